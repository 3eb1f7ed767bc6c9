//! Polls every device on its own interval, one fetch at a time.
//!
//! Items wait in a min-heap keyed by their due time. The loop pops the soonest item, sleeps
//! until it is due, fetches, records the derived metrics and pushes the item back. A failed
//! poll pushes the item back `BACKOFF_FACTOR` intervals out instead of one.

use crate::config::normalize_interval;
use crate::derive::{derive, DerivationState};
use crate::devices::{Device, DeviceRegistry};
use crate::error::{AppError, Result};
use crate::snapshot::{self, SharedSnapshot};
use rand::Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const BACKOFF_FACTOR: u32 = 5;

struct Entry<T> {
    due: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap by due time. Equal due times pop in insertion order.
pub struct DueQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
}

impl<T> DueQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { due, seq, item }));
    }

    pub fn pop(&mut self) -> Option<(Instant, T)> {
        self.heap.pop().map(|Reverse(e)| (e.due, e.item))
    }

    pub fn peek_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for DueQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A device plus the state the scheduler keeps for it.
pub struct ScheduledItem {
    pub slot: usize,
    pub device: Arc<dyn Device>,
    pub state: DerivationState,
}

impl ScheduledItem {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(normalize_interval(self.device.interval_secs()))
    }
}

/// First due time: uniformly between half and one full interval from `now`.
pub fn initial_due<R: Rng + ?Sized>(now: Instant, interval: Duration, rng: &mut R) -> Instant {
    let permille: u32 = rng.gen_range(500..=1000);
    now + interval * permille / 1000
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success {
        slot: usize,
        value: f64,
        next_due: Instant,
    },
    Failure {
        slot: usize,
        next_due: Instant,
    },
}

impl PollOutcome {
    pub fn slot(&self) -> usize {
        match self {
            PollOutcome::Success { slot, .. } | PollOutcome::Failure { slot, .. } => *slot,
        }
    }

    pub fn next_due(&self) -> Instant {
        match self {
            PollOutcome::Success { next_due, .. } | PollOutcome::Failure { next_due, .. } => {
                *next_due
            }
        }
    }
}

pub struct Scheduler {
    queue: DueQueue<ScheduledItem>,
    snapshot: SharedSnapshot,
}

impl Scheduler {
    pub fn new(registry: &DeviceRegistry, snapshot: SharedSnapshot) -> Self {
        Self::with_rng(registry, snapshot, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        registry: &DeviceRegistry,
        snapshot: SharedSnapshot,
        rng: &mut R,
    ) -> Self {
        let now = Instant::now();
        let mut queue = DueQueue::new();

        for (slot, device) in registry.iter() {
            let item = ScheduledItem {
                slot,
                device: Arc::clone(device),
                state: DerivationState::default(),
            };
            let due = initial_due(now, item.interval(), rng);
            queue.push(due, item);
        }

        Self { queue, snapshot }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.peek_due()
    }

    /// Poll forever. Returns at once when there is nothing to poll.
    pub async fn run(mut self) {
        if self.queue.is_empty() {
            info!("no devices to poll");
            return;
        }

        info!(devices = self.queue.len(), "polling started");
        while self.poll_next().await.is_some() {}
    }

    /// Wait for the soonest item, poll it and reschedule it.
    ///
    /// A reading that cannot be fetched, is not finite or cannot be published counts as a
    /// failure: nothing is recorded and the item backs off.
    pub async fn poll_next(&mut self) -> Option<PollOutcome> {
        let (due, mut item) = self.queue.pop()?;
        tokio::time::sleep_until(due).await;

        let device = Arc::clone(&item.device);
        let result = device.fetch().await.and_then(finite);
        let now = Instant::now();
        let interval = item.interval();

        let recorded = result.and_then(|value| {
            record(&self.snapshot, &mut item, value, now)?;
            Ok(value)
        });

        let outcome = match recorded {
            Ok(value) => {
                debug!(
                    device = %device.log_name(),
                    category = %device.category(),
                    value,
                    "read value"
                );
                PollOutcome::Success {
                    slot: item.slot,
                    value,
                    next_due: now + interval,
                }
            }
            Err(e) => {
                warn!(
                    device = %device.log_name(),
                    category = %device.category(),
                    error = %e,
                    "cannot read value"
                );
                PollOutcome::Failure {
                    slot: item.slot,
                    next_due: now + interval * BACKOFF_FACTOR,
                }
            }
        };

        self.queue.push(outcome.next_due(), item);
        Some(outcome)
    }
}

fn finite(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::Parse(format!("not a finite reading: {}", value)))
    }
}

/// Derive and publish one reading. The item's state moves only when publishing succeeds.
fn record(
    shared: &SharedSnapshot,
    item: &mut ScheduledItem,
    value: f64,
    now: Instant,
) -> Result<()> {
    let device = Arc::clone(&item.device);
    let derivation = derive(
        &item.state,
        device.metric_name(),
        device.category(),
        value,
        now,
    );

    let labels = device.labels();
    snapshot::lock(shared).record(
        item.slot,
        &labels,
        &derivation.updates,
        derivation.formatted,
    )?;
    item.state = derivation.state;
    Ok(())
}
