//! Turns raw readings into gauge and counter updates.
//!
//! Cumulative (energy) readings feed two baselines. The counter baseline keeps every positive
//! delta so the exported total never loses energy; the rate baseline only moves on genuine
//! increases and silently resynchronizes after a meter reset.

use crate::devices::Category;
use crate::error::Result;
use crate::sink::MetricSink;
use tokio::time::Instant;

pub const TOTAL_SUFFIX: &str = "total";
pub const RATE_SUFFIX: &str = "rate";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivationState {
    pub last_cumulative: Option<f64>,
    pub rate_baseline: Option<RateBaseline>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBaseline {
    pub value: f64,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkUpdate {
    SetGauge { name: String, value: f64 },
    AddToCounter { name: String, delta: f64 },
    ResetCounter { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub updates: Vec<SinkUpdate>,
    pub state: DerivationState,
    pub formatted: String,
}

pub fn total_name(metric: &str) -> String {
    format!("{}_{}", metric, TOTAL_SUFFIX)
}

pub fn rate_name(metric: &str) -> String {
    format!("{}_{}", metric, RATE_SUFFIX)
}

/// Compute the sink updates and next state for one successful reading.
///
/// An empty `metric` still advances the state and formatting but publishes nothing.
pub fn derive(
    state: &DerivationState,
    metric: &str,
    category: Category,
    value: f64,
    now: Instant,
) -> Derivation {
    let mut updates = vec![SinkUpdate::SetGauge {
        name: metric.to_string(),
        value,
    }];
    let mut next = *state;

    if category == Category::Energy {
        match state.last_cumulative {
            Some(last) if value >= last => updates.push(SinkUpdate::AddToCounter {
                name: total_name(metric),
                delta: value - last,
            }),
            Some(_) => updates.push(SinkUpdate::ResetCounter {
                name: total_name(metric),
            }),
            None => {}
        }
        next.last_cumulative = Some(value);

        match state.rate_baseline {
            None => next.rate_baseline = Some(RateBaseline { value, at: now }),
            Some(base) if value > base.value && now > base.at => {
                let elapsed = now.duration_since(base.at).as_secs_f64();
                updates.push(SinkUpdate::SetGauge {
                    name: rate_name(metric),
                    value: (value - base.value) / elapsed,
                });
                next.rate_baseline = Some(RateBaseline { value, at: now });
            }
            Some(base) if value < base.value => {
                next.rate_baseline = Some(RateBaseline { value, at: now });
            }
            Some(_) => {}
        }
    }

    if metric.is_empty() {
        updates.clear();
    }

    Derivation {
        updates,
        state: next,
        formatted: category.format_value(value),
    }
}

/// Write one derivation step. Every series is checked first, so a failing step writes nothing.
pub fn apply(sink: &mut dyn MetricSink, labels: &[&str], updates: &[SinkUpdate]) -> Result<()> {
    for update in updates {
        match update {
            SinkUpdate::SetGauge { name, .. } => sink.check_gauge(name, labels)?,
            SinkUpdate::AddToCounter { name, .. } | SinkUpdate::ResetCounter { name } => {
                sink.check_counter(name, labels)?
            }
        }
    }

    for update in updates {
        match update {
            SinkUpdate::SetGauge { name, value } => sink.set_gauge(name, labels, *value)?,
            SinkUpdate::AddToCounter { name, delta } => {
                sink.add_to_counter(name, labels, *delta)?
            }
            SinkUpdate::ResetCounter { name } => sink.reset_counter(name, labels)?,
        }
    }
    Ok(())
}
