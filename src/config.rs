use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use tracing::warn;

/// Interval used when a source file has none, or a zero/negative one.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Longest accepted interval (30 days); longer ones are clamped.
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

const DEFAULT_SETUP_DIR: &str = "./setup";
const DEFAULT_BIND: &str = "0.0.0.0:9876";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub setup_dir: PathBuf,
    pub bind: String,
    pub http_timeout_secs: u64,
}

impl Settings {
    /// `APP_SETUP`, `APP_BIND` and `APP_HTTP_TIMEOUT_SECS`, each with a default.
    pub fn from_env() -> Result<Self> {
        let setup_dir = env::var("APP_SETUP")
            .unwrap_or_else(|_| DEFAULT_SETUP_DIR.to_string())
            .into();

        let bind = env::var("APP_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());

        let http_timeout_secs = match env::var("APP_HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                AppError::Config(format!("invalid APP_HTTP_TIMEOUT_SECS: {}", raw))
            })?,
            Err(_) => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        if http_timeout_secs == 0 {
            return Err(AppError::Config(
                "APP_HTTP_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }

        Ok(Self {
            setup_dir,
            bind,
            http_timeout_secs,
        })
    }

    /// Shared client for all providers; the request timeout is the only deadline a fetch gets.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()?;
        Ok(client)
    }
}

/// One device definition file from the setup directory.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceFile {
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// "tasmota" | "homematic" | "iobroker"
    pub provider: String,
    #[serde(default)]
    pub energy_metric: String,
    #[serde(default)]
    pub power_metric: String,
    #[serde(default)]
    pub temperature_metric: String,
    #[serde(default)]
    pub light_metric: String,
    #[serde(default)]
    pub address: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Duration such as "30s" or "5m"
    pub interval: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub hm_name: String,
}

impl SourceFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }
}

impl SourceConfig {
    pub fn interval_secs(&self) -> Result<u64> {
        let raw = match self.interval.as_deref().map(str::trim) {
            None | Some("") => return Ok(DEFAULT_INTERVAL_SECS),
            Some(raw) => raw,
        };

        if raw.starts_with('-') {
            return Ok(DEFAULT_INTERVAL_SECS);
        }

        let duration = humantime::parse_duration(raw)
            .map_err(|e| AppError::Config(format!("invalid interval '{}': {}", raw, e)))?;

        // Sub-second parts round up, so "500ms" polls every second.
        let secs = duration
            .as_secs()
            .saturating_add(u64::from(duration.subsec_nanos() > 0));
        if secs > MAX_INTERVAL_SECS {
            warn!(interval = %raw, max_secs = MAX_INTERVAL_SECS, "interval too long, clamping");
        }
        Ok(normalize_interval(secs))
    }

    /// Basic auth credentials, only when both parts are present.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.user_name, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}

/// Zero becomes the default; anything above `MAX_INTERVAL_SECS` is clamped.
pub fn normalize_interval(secs: u64) -> u64 {
    if secs == 0 {
        DEFAULT_INTERVAL_SECS
    } else {
        secs.min(MAX_INTERVAL_SECS)
    }
}

/// Expand $(VAR) and ${VAR} placeholders from the environment; "$$" is a literal "$".
/// A placeholder naming an unset variable is an error.
pub fn expand_env_placeholders(input: &str) -> Result<String> {
    let re = regex::Regex::new(
        r"\$\$|\$\(([A-Za-z_][A-Za-z0-9_]*)\)|\$\{([A-Za-z_][A-Za-z0-9_]*)\}",
    )
    .map_err(|e| AppError::Config(e.to_string()))?;

    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for cap in re.captures_iter(input) {
        let Some(whole) = cap.get(0) else { continue };
        out.push_str(&input[last..whole.start()]);

        match cap.get(1).or_else(|| cap.get(2)) {
            Some(var) => {
                let value = env::var(var.as_str()).map_err(|_| {
                    AppError::Config(format!("missing environment variable: {}", var.as_str()))
                })?;
                out.push_str(&value);
            }
            None => out.push('$'),
        }

        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn source_with_interval(interval: Option<&str>) -> SourceConfig {
        SourceConfig {
            provider: "tasmota".to_string(),
            energy_metric: String::new(),
            power_metric: String::new(),
            temperature_metric: String::new(),
            light_metric: String::new(),
            address: String::new(),
            user_name: None,
            password: None,
            interval: interval.map(str::to_string),
            devices: Vec::new(),
        }
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!(source_with_interval(Some("30s")).interval_secs().unwrap(), 30);
        assert_eq!(source_with_interval(Some("5m")).interval_secs().unwrap(), 300);
        assert_eq!(source_with_interval(Some("1m 30s")).interval_secs().unwrap(), 90);
    }

    #[test]
    fn test_interval_defaults() {
        assert_eq!(source_with_interval(None).interval_secs().unwrap(), 60);
        assert_eq!(source_with_interval(Some("0s")).interval_secs().unwrap(), 60);
        assert_eq!(source_with_interval(Some("-10s")).interval_secs().unwrap(), 60);
    }

    #[test]
    fn test_interval_sub_second_rounds_up() {
        assert_eq!(source_with_interval(Some("500ms")).interval_secs().unwrap(), 1);
        assert_eq!(source_with_interval(Some("1s 500ms")).interval_secs().unwrap(), 2);
    }

    #[test]
    fn test_interval_clamped() {
        assert_eq!(
            source_with_interval(Some("100years")).interval_secs().unwrap(),
            MAX_INTERVAL_SECS
        );
        assert_eq!(normalize_interval(u64::MAX), MAX_INTERVAL_SECS);
        assert_eq!(normalize_interval(0), DEFAULT_INTERVAL_SECS);
        assert_eq!(normalize_interval(45), 45);
    }

    #[test]
    fn test_interval_invalid() {
        assert!(source_with_interval(Some("soon")).interval_secs().is_err());
    }

    #[test]
    #[serial]
    fn test_expand_env_placeholders() {
        std::env::set_var("HOME_EXPORTER_TEST_PW", "s3cret");

        let out = expand_env_placeholders("a: $(HOME_EXPORTER_TEST_PW)\nb: ${HOME_EXPORTER_TEST_PW}")
            .unwrap();
        assert_eq!(out, "a: s3cret\nb: s3cret");

        std::env::remove_var("HOME_EXPORTER_TEST_PW");
    }

    #[test]
    fn test_expand_env_placeholders_escape_and_plain_dollar() {
        let out = expand_env_placeholders("price: $$5 and $.path").unwrap();
        assert_eq!(out, "price: $5 and $.path");
    }

    #[test]
    #[serial]
    fn test_expand_env_placeholders_missing_var() {
        std::env::remove_var("HOME_EXPORTER_MISSING");
        let err = expand_env_placeholders("x: $(HOME_EXPORTER_MISSING)").unwrap_err();
        assert!(err.to_string().contains("HOME_EXPORTER_MISSING"));
    }

    #[test]
    fn test_parse_source_file() {
        let raw = r#"
source:
  provider: tasmota
  energy_metric: home_energy
  power_metric: home_power
  interval: 30s
  devices:
    - name: Fridge
      room: Kitchen
      address: 10.0.0.5
    - address: 10.0.0.6
"#;
        let file = SourceFile::parse(raw).unwrap();
        assert_eq!(file.source.provider, "tasmota");
        assert_eq!(file.source.energy_metric, "home_energy");
        assert!(file.source.temperature_metric.is_empty());
        assert_eq!(file.source.devices.len(), 2);
        assert_eq!(file.source.devices[1].name, "");
        assert_eq!(file.source.interval_secs().unwrap(), 30);
        assert!(file.source.credentials().is_none());
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        std::env::remove_var("APP_SETUP");
        std::env::remove_var("APP_BIND");
        std::env::remove_var("APP_HTTP_TIMEOUT_SECS");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.setup_dir, PathBuf::from("./setup"));
        assert_eq!(settings.bind, "0.0.0.0:9876");
        assert_eq!(settings.http_timeout_secs, 10);
    }

    #[test]
    #[serial]
    fn test_settings_rejects_zero_timeout() {
        std::env::set_var("APP_HTTP_TIMEOUT_SECS", "0");
        assert!(Settings::from_env().is_err());
        std::env::remove_var("APP_HTTP_TIMEOUT_SECS");
    }
}
