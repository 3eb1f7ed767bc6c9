use crate::config::SourceConfig;
use crate::devices::{parse_reading, Category, Device, DeviceRegistry};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Temperature state served by the ioBroker simple-api adapter.
#[derive(Debug, Clone)]
pub struct IoBrokerDevice {
    client: reqwest::Client,
    metric: String,
    name: String,
    room: String,
    state: String,
    interval_secs: u64,
    value_url: String,
}

fn value_url(host: &str, state: &str) -> String {
    format!("http://{}/getPlainValue/{}", host, state)
}

/// The adapter returns the bare value, sometimes quoted.
pub fn parse_plain_value(body: &str) -> Result<f64> {
    parse_reading(body.trim().trim_matches('"'))
}

#[async_trait]
impl Device for IoBrokerDevice {
    fn device_id(&self) -> &str {
        &self.state
    }

    fn provider(&self) -> &'static str {
        "iobroker"
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
        Category::Temperature
    }

    fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    fn log_name(&self) -> String {
        format!("IoBroker({})", self.name)
    }

    fn full_name(&self) -> String {
        format!(
            "{}[provider:iobroker,endpoint:{},name:{},room:{},interval:{}s]",
            self.metric, self.state, self.name, self.room, self.interval_secs
        )
    }

    async fn fetch(&self) -> Result<f64> {
        let body = self
            .client
            .get(&self.value_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_plain_value(&body)
    }
}

pub fn load(
    client: &reqwest::Client,
    source: &SourceConfig,
    interval_secs: u64,
    registry: &mut DeviceRegistry,
) {
    if source.temperature_metric.is_empty() {
        return;
    }

    for entry in &source.devices {
        info!(name = %entry.name, room = %entry.room, address = %entry.address, "found device");

        registry.add(Arc::new(IoBrokerDevice {
            client: client.clone(),
            metric: source.temperature_metric.clone(),
            name: entry.name.clone(),
            room: entry.room.clone(),
            state: entry.address.clone(),
            interval_secs,
            value_url: value_url(&source.address, &entry.address),
        }));
    }
}
