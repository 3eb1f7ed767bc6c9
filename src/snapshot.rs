use crate::derive::{apply, SinkUpdate};
use crate::error::Result;
use crate::sink::PrometheusSink;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Metrics and latest formatted values, guarded together so readers never see a gauge from
/// one poll paired with text from another.
pub type SharedSnapshot = Arc<Mutex<Snapshot>>;

pub struct Snapshot {
    sink: PrometheusSink,
    latest: Vec<Option<String>>,
}

impl Snapshot {
    pub fn new(slots: usize) -> Self {
        Self {
            sink: PrometheusSink::new(),
            latest: vec![None; slots],
        }
    }

    pub fn shared(slots: usize) -> SharedSnapshot {
        Arc::new(Mutex::new(Self::new(slots)))
    }

    pub fn sink(&self) -> &PrometheusSink {
        &self.sink
    }

    /// Formatted text of the last successful reading of `slot`.
    pub fn latest(&self, slot: usize) -> Option<&str> {
        self.latest.get(slot).and_then(|v| v.as_deref())
    }

    /// Apply one derivation step. On error neither the sink nor the text changes.
    pub fn record(
        &mut self,
        slot: usize,
        labels: &[&str],
        updates: &[SinkUpdate],
        formatted: String,
    ) -> Result<()> {
        apply(&mut self.sink, labels, updates)?;

        if slot >= self.latest.len() {
            self.latest.resize(slot + 1, None);
        }
        self.latest[slot] = Some(formatted);
        Ok(())
    }
}

/// Lock the snapshot. A panic in another holder does not leave the data half-written, since
/// every mutation goes through [`Snapshot::record`], so a poisoned lock is still usable.
pub fn lock(shared: &SharedSnapshot) -> MutexGuard<'_, Snapshot> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
