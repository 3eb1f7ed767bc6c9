use crate::config::SourceConfig;
use crate::devices::{Category, Device, DeviceRegistry};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Energy or power channel of a Tasmota smart plug.
#[derive(Debug, Clone)]
pub struct TasmotaDevice {
    client: reqwest::Client,
    metric: String,
    category: Category,
    name: String,
    room: String,
    address: String,
    interval_secs: u64,
    energy_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "Status")]
    status: Status,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "DeviceName", default)]
    device_name: String,
    #[serde(rename = "FriendlyName", default)]
    friendly_name: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EnergyResponse {
    #[serde(rename = "StatusSNS")]
    status_sns: SensorStatus,
}

#[derive(Debug, Deserialize)]
struct SensorStatus {
    #[serde(rename = "ENERGY")]
    energy: EnergyReading,
}

#[derive(Debug, Deserialize)]
struct EnergyReading {
    /// kWh since the meter was last reset
    #[serde(rename = "Total")]
    total: f64,
    /// W
    #[serde(rename = "Power")]
    power: f64,
}

fn energy_url(address: &str) -> String {
    format!("http://{}/cm?cmnd=Status%2010", address)
}

fn status_url(address: &str) -> String {
    format!("http://{}/cm?cmnd=Status", address)
}

#[async_trait]
impl Device for TasmotaDevice {
    fn device_id(&self) -> &str {
        &self.address
    }

    fn provider(&self) -> &'static str {
        "tasmota"
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
        format!("Tasmota({})", self.name)
    }

    async fn fetch(&self) -> Result<f64> {
        let reading: EnergyResponse = self
            .client
            .get(&self.energy_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match self.category {
            Category::Energy => Ok(reading.status_sns.energy.total * 1000.0),
            Category::Power => Ok(reading.status_sns.energy.power),
            other => Err(AppError::Device(format!(
                "tasmota cannot read category {}",
                other
            ))),
        }
    }
}

/// First friendly name, falling back to the device name.
async fn read_name(client: &reqwest::Client, address: &str) -> Result<String> {
    let response: StatusResponse = client
        .get(status_url(address))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let status = response.status;
    status
        .friendly_name
        .into_iter()
        .find(|n| !n.is_empty())
        .or_else(|| Some(status.device_name).filter(|n| !n.is_empty()))
        .ok_or_else(|| AppError::Device(format!("{} reports no name", address)))
}

pub async fn load(
    client: &reqwest::Client,
    source: &SourceConfig,
    interval_secs: u64,
    registry: &mut DeviceRegistry,
) {
    for entry in &source.devices {
        let mut name = entry.name.clone();

        if name.is_empty() {
            match read_name(client, &entry.address).await {
                Ok(found) => {
                    info!(name = %found, room = %entry.room, address = %entry.address, "found device");
                    name = found;
                }
                Err(e) => {
                    warn!(address = %entry.address, error = %e, "cannot read name");
                    continue;
                }
            }
        }

        let channels = [
            (&source.energy_metric, Category::Energy),
            (&source.power_metric, Category::Power),
        ];

        for (metric, category) in channels {
            if metric.is_empty() {
                continue;
            }

            registry.add(Arc::new(TasmotaDevice {
                client: client.clone(),
                metric: metric.clone(),
                category,
                name: name.clone(),
                room: entry.room.clone(),
                address: entry.address.clone(),
                interval_secs,
                energy_url: energy_url(&entry.address),
            }));
        }
    }
}
