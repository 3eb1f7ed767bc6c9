#![allow(dead_code)]

use async_trait::async_trait;
use home_exporter::{AppError, Category, Device, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Device returning a scripted sequence of readings; `None` entries fail.
pub struct ScriptedDevice {
    pub id: String,
    pub metric: String,
    pub name: String,
    pub room: String,
    pub category: Category,
    pub interval_secs: u64,
    readings: Mutex<VecDeque<Option<f64>>>,
    repeat_last: Option<Option<f64>>,
    pub calls: AtomicUsize,
}

impl ScriptedDevice {
    pub fn new(id: &str, metric: &str, category: Category, interval_secs: u64) -> Self {
        Self {
            id: id.to_string(),
            metric: metric.to_string(),
            name: format!("{}-name", id),
            room: "Lab".to_string(),
            category,
            interval_secs,
            readings: Mutex::new(VecDeque::new()),
            repeat_last: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn readings(self, readings: &[Option<f64>]) -> Self {
        *self.readings.lock().unwrap() = readings.iter().copied().collect();
        self
    }

    /// Once the scripted readings run out, keep answering with `reading`.
    pub fn then_always(mut self, reading: Option<f64>) -> Self {
        self.repeat_last = Some(reading);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    fn device_id(&self) -> &str {
        &self.id
    }
    fn provider(&self) -> &'static str {
        "fake"
    }
    fn metric_name(&self) -> &str {
        &self.metric
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn room(&self) -> &str {
        &self.room
    }
    fn category(&self) -> Category {
        self.category
    }
    fn interval_secs(&self) -> u64 {
        self.interval_secs
    }
    fn log_name(&self) -> String {
        format!("Fake({})", self.id)
    }

    async fn fetch(&self) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.readings.lock().unwrap().pop_front();
        match next.or(self.repeat_last) {
            Some(Some(value)) => Ok(value),
            _ => Err(AppError::Device(format!("{} unavailable", self.id))),
        }
    }
}
