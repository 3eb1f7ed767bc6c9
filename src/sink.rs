//! Labeled gauges and counters keyed by series name.

use crate::error::Result;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

/// Label names shared by every exported series, in `Device::labels` order.
pub const LABEL_NAMES: [&str; 3] = ["provider", "name", "room"];

/// Destination of derived readings. Series are created on first use.
pub trait MetricSink {
    /// Fail if `name` cannot hold a gauge for `labels`. Writes no sample.
    fn check_gauge(&mut self, name: &str, labels: &[&str]) -> Result<()>;
    /// Fail if `name` cannot hold a counter for `labels`. Writes no sample.
    fn check_counter(&mut self, name: &str, labels: &[&str]) -> Result<()>;
    fn set_gauge(&mut self, name: &str, labels: &[&str], value: f64) -> Result<()>;
    fn add_to_counter(&mut self, name: &str, labels: &[&str], delta: f64) -> Result<()>;
    /// Retire the counter for `labels` and start a fresh one at zero.
    fn reset_counter(&mut self, name: &str, labels: &[&str]) -> Result<()>;
}

/// [`MetricSink`] backed by a Prometheus registry, exported on `/metrics`.
pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<String, GaugeVec>,
    counters: HashMap<String, CounterVec>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            gauges: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    fn gauge(&mut self, name: &str) -> Result<GaugeVec> {
        if let Some(g) = self.gauges.get(name) {
            return Ok(g.clone());
        }

        let g = GaugeVec::new(Opts::new(name, name), &LABEL_NAMES)?;
        self.registry.register(Box::new(g.clone()))?;
        self.gauges.insert(name.to_string(), g.clone());
        Ok(g)
    }

    fn check_labels(labels: &[&str]) -> Result<()> {
        if labels.len() != LABEL_NAMES.len() {
            return Err(prometheus::Error::InconsistentCardinality {
                expect: LABEL_NAMES.len(),
                got: labels.len(),
            }
            .into());
        }
        Ok(())
    }

    fn counter(&mut self, name: &str) -> Result<CounterVec> {
        if let Some(c) = self.counters.get(name) {
            return Ok(c.clone());
        }

        let c = CounterVec::new(Opts::new(name, name), &LABEL_NAMES)?;
        self.registry.register(Box::new(c.clone()))?;
        self.counters.insert(name.to_string(), c.clone());
        Ok(c)
    }

    /// Current gauge value, `None` if the series or label set was never written.
    pub fn gauge_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        if !self.gauges.contains_key(name) {
            return None;
        }
        self.sample(name, labels).map(|m| m.get_gauge().get_value())
    }

    /// Current counter value, `None` if the series or label set was never written.
    pub fn counter_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        if !self.counters.contains_key(name) {
            return None;
        }
        self.sample(name, labels).map(|m| m.get_counter().get_value())
    }

    fn sample(&self, name: &str, labels: &[&str]) -> Option<prometheus::proto::Metric> {
        self.registry
            .gather()
            .into_iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().to_vec())
            .find(|metric| {
                let pairs = metric.get_label();
                LABEL_NAMES.iter().zip(labels).all(|(label, value)| {
                    pairs
                        .iter()
                        .any(|p| p.get_name() == *label && p.get_value() == *value)
                })
            })
    }

    /// Text exposition format of every registered series.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| anyhow::anyhow!(e).into())
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for PrometheusSink {
    fn check_gauge(&mut self, name: &str, labels: &[&str]) -> Result<()> {
        self.gauge(name)?;
        Self::check_labels(labels)
    }

    fn check_counter(&mut self, name: &str, labels: &[&str]) -> Result<()> {
        self.counter(name)?;
        Self::check_labels(labels)
    }

    fn set_gauge(&mut self, name: &str, labels: &[&str], value: f64) -> Result<()> {
        self.gauge(name)?
            .get_metric_with_label_values(labels)?
            .set(value);
        Ok(())
    }

    fn add_to_counter(&mut self, name: &str, labels: &[&str], delta: f64) -> Result<()> {
        self.counter(name)?
            .get_metric_with_label_values(labels)?
            .inc_by(delta);
        Ok(())
    }

    fn reset_counter(&mut self, name: &str, labels: &[&str]) -> Result<()> {
        let counter = self.counter(name)?;
        // Missing label set is fine: there is nothing to retire yet.
        let _ = counter.remove_label_values(labels);
        counter.get_metric_with_label_values(labels)?;
        Ok(())
    }
}
