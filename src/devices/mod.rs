//! Pollable value sources and their discovery from the setup directory.
//!
//! Every provider exposes its channels as [`Device`] trait objects. The scheduler only ever
//! sees this trait, so adding a vendor means adding a module here and a branch in
//! [`load_devices`].

pub mod homematic;
pub mod iobroker;
pub mod tasmota;

use crate::config::SourceFile;
use crate::error::{AppError, Result};
use crate::overview::OVERVIEW_FILE;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Drives how a reading is turned into metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Energy,
    Power,
    Temperature,
    Light,
    Generic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Energy => "energy",
            Category::Power => "power",
            Category::Temperature => "temperature",
            Category::Light => "light",
            Category::Generic => "generic",
        }
    }

    /// Text shown in the overview. Energy readings arrive in Wh and are shown in kWh.
    pub fn format_value(&self, value: f64) -> String {
        match self {
            Category::Energy => format!("{:.2} kW/h", value / 1000.0),
            Category::Power => format!("{:.2} W", value),
            Category::Temperature => format!("{:.2} °C", value),
            Category::Light => format!("{:.0} lx", value),
            Category::Generic => format!("{:.2}", value),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a textual reading. Only finite numbers count as readings.
pub fn parse_reading(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(AppError::Parse(format!("not a number: '{}'", raw))),
    }
}

/// One metric channel of a physical device.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable key of the physical sensor; channels of one meter share it.
    fn device_id(&self) -> &str;
    fn provider(&self) -> &'static str;
    /// Published series name; empty means the reading is not exported.
    fn metric_name(&self) -> &str;
    fn name(&self) -> &str;
    fn room(&self) -> &str;
    fn category(&self) -> Category;
    fn interval_secs(&self) -> u64;

    fn labels(&self) -> [&str; 3] {
        [self.provider(), self.name(), self.room()]
    }

    fn log_name(&self) -> String;

    fn full_name(&self) -> String {
        format!(
            "{}[provider:{},name:{},room:{},interval:{}s]",
            self.metric_name(),
            self.provider(),
            self.name(),
            self.room(),
            self.interval_secs()
        )
    }

    async fn fetch(&self) -> Result<f64>;
}

/// All configured channels, addressable by slot and grouped by device identity.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<dyn Device>>,
    by_id: BTreeMap<String, Vec<usize>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: Arc<dyn Device>) -> usize {
        let slot = self.devices.len();
        self.by_id
            .entry(device.device_id().to_string())
            .or_default()
            .push(slot);
        self.devices.push(device);
        slot
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<dyn Device>> {
        self.devices.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn Device>)> {
        self.devices.iter().enumerate()
    }

    /// Slots per device identity, in identity order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.by_id.iter().map(|(id, slots)| (id.as_str(), slots.as_slice()))
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.devices.iter().map(|d| d.full_name()))
            .finish()
    }
}

/// Walk `setup` and build every device described by its source files.
///
/// Unreadable files, unknown providers and bad intervals are skipped with a warning;
/// malformed YAML aborts loading.
pub async fn load_devices(setup: &Path, client: &reqwest::Client) -> Result<DeviceRegistry> {
    let mut registry = DeviceRegistry::new();

    for path in source_files(setup)? {
        info!(file = %path.display(), "loading device file");

        let file = match SourceFile::load(&path) {
            Ok(file) => file,
            Err(AppError::Io(e)) => {
                warn!(file = %path.display(), error = %e, "cannot read file");
                continue;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot parse file");
                return Err(e);
            }
        };

        let source = &file.source;
        let interval_secs = match source.interval_secs() {
            Ok(secs) => secs,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot parse interval");
                continue;
            }
        };

        let before = registry.len();
        match source.provider.as_str() {
            "tasmota" => tasmota::load(client, source, interval_secs, &mut registry).await,
            "homematic" => homematic::load(client, source, interval_secs, &mut registry).await,
            "iobroker" => iobroker::load(client, source, interval_secs, &mut registry),
            other => {
                warn!(file = %path.display(), provider = %other, "unknown provider");
                continue;
            }
        }

        info!(
            file = %path.display(),
            provider = %source.provider,
            devices = registry.len() - before,
            "device file loaded"
        );
    }

    Ok(registry)
}

fn source_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }

            let is_yaml = path.extension().is_some_and(|ext| ext == "yaml");
            let is_overview = path.file_name().is_some_and(|name| name == OVERVIEW_FILE);
            if is_yaml && !is_overview {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        id: &'static str,
        metric: &'static str,
    }

    #[async_trait]
    impl Device for Fixed {
        fn device_id(&self) -> &str {
            self.id
        }
        fn provider(&self) -> &'static str {
            "fixed"
        }
        fn metric_name(&self) -> &str {
            self.metric
        }
        fn name(&self) -> &str {
            "Meter"
        }
        fn room(&self) -> &str {
            "Cellar"
        }
        fn category(&self) -> Category {
            Category::Generic
        }
        fn interval_secs(&self) -> u64 {
            30
        }
        fn log_name(&self) -> String {
            format!("Fixed({})", self.id)
        }
        async fn fetch(&self) -> Result<f64> {
            Ok(1.0)
        }
    }

    #[test]
    fn test_registry_groups_by_identity() {
        let mut registry = DeviceRegistry::new();
        registry.add(Arc::new(Fixed { id: "b", metric: "energy" }));
        registry.add(Arc::new(Fixed { id: "a", metric: "temp" }));
        registry.add(Arc::new(Fixed { id: "b", metric: "power" }));

        let groups: Vec<(&str, Vec<usize>)> = registry
            .groups()
            .map(|(id, slots)| (id, slots.to_vec()))
            .collect();
        assert_eq!(groups, vec![("a", vec![1]), ("b", vec![0, 2])]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_default_labels_and_full_name() {
        let device = Fixed { id: "x", metric: "home_energy" };
        assert_eq!(device.labels(), ["fixed", "Meter", "Cellar"]);
        assert_eq!(
            device.full_name(),
            "home_energy[provider:fixed,name:Meter,room:Cellar,interval:30s]"
        );
    }

    #[test]
    fn test_format_value() {
        assert_eq!(Category::Temperature.format_value(21.456), "21.46 °C");
        assert_eq!(Category::Energy.format_value(5200.0), "5.20 kW/h");
        assert_eq!(Category::Power.format_value(42.0), "42.00 W");
        assert_eq!(Category::Light.format_value(120.4), "120 lx");
        assert_eq!(Category::Generic.format_value(1.0), "1.00");
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading(" 21.5\n").unwrap(), 21.5);
        assert_eq!(parse_reading("-3").unwrap(), -3.0);
        for bad in ["NaN", "inf", "-infinity", "", "warm"] {
            assert!(parse_reading(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_source_files_skips_overview() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("overview.yaml"), "tables: []").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("nested").join("b.yaml"), "").unwrap();

        let files = source_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);
    }
}
