//! Homematic devices read through the CCU's ReGa script interface.
//!
//! Every query is a small script POSTed to the CCU; the CCU answers with a flat XML document
//! holding one element per script variable.

use crate::config::SourceConfig;
use crate::devices::{parse_reading, Category, Device, DeviceRegistry};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

const SCRIPT_PORT: u16 = 8181;

static REPLY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>([^<]*)</([A-Za-z_][A-Za-z0-9_]*)>").unwrap()
});

/// Posts ReGa scripts to one CCU.
#[derive(Debug, Clone)]
struct ScriptClient {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, String)>,
}

impl ScriptClient {
    fn new(client: &reqwest::Client, source: &SourceConfig) -> Self {
        Self {
            client: client.clone(),
            url: script_url(&source.address),
            credentials: source.credentials(),
        }
    }

    async fn run(&self, script: &str) -> Result<HashMap<String, String>> {
        debug!(url = %self.url, script = %script, "running ReGa script");

        let mut request = self.client.post(&self.url).body(script.to_string());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let body = request.send().await?.error_for_status()?.text().await?;
        parse_reply(&body)
    }
}

fn script_url(address: &str) -> String {
    if address.contains(':') {
        format!("http://{}/Test.exe", address)
    } else {
        format!("http://{}:{}/Test.exe", address, SCRIPT_PORT)
    }
}

/// Collect the `<tag>text</tag>` leaves of a script reply.
fn parse_reply(body: &str) -> Result<HashMap<String, String>> {
    let fields: HashMap<String, String> = REPLY_FIELD
        .captures_iter(body)
        .filter(|cap| cap[1] == cap[3])
        .map(|cap| (cap[1].to_string(), unescape(&cap[2])))
        .collect();

    if fields.is_empty() {
        return Err(AppError::Parse("empty ReGa reply".to_string()));
    }
    Ok(fields)
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Channels and datapoints of a known Homematic device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypeProfile {
    /// Channel carrying ENERGY_COUNTER and POWER
    meter: Option<u32>,
    temperature: Option<(u32, &'static str)>,
    light: Option<(u32, &'static str)>,
}

fn profile(hss_type: &str) -> Option<TypeProfile> {
    let p = |meter, temperature, light| TypeProfile {
        meter,
        temperature,
        light,
    };

    match hss_type {
        "HMIP-PSM" => Some(p(Some(6), Some((0, "ACTUAL_TEMPERATURE")), None)),
        "HM-ES-PMSw1-Pl" => Some(p(Some(2), None, None)),
        "HM-ES-TX-WM" => Some(p(Some(1), None, None)),
        "HmIP-WTH-2" | "HmIP-eTRV-B" => Some(p(None, Some((1, "ACTUAL_TEMPERATURE")), None)),
        "HM-CC-RT-DN" => Some(p(None, Some((4, "ACTUAL_TEMPERATURE")), None)),
        "HM-WDS10-TH-O" | "HM-WDS40-TH-I" => Some(p(None, Some((1, "TEMPERATURE")), None)),
        "HmIP-SMI55" => Some(p(None, None, Some((3, "CURRENT_ILLUMINATION")))),
        "HmIP-SMI" => Some(p(None, None, Some((1, "CURRENT_ILLUMINATION")))),
        "HM-Sec-MDIR-2" => Some(p(None, None, Some((1, "BRIGHTNESS")))),
        "HM-WDS100-C6-O" => Some(p(None, Some((1, "TEMPERATURE")), Some((1, "BRIGHTNESS")))),
        _ => None,
    }
}

/// (metric, category, channel, datapoint) for every configured metric the type supports.
fn channels(
    source: &SourceConfig,
    profile: &TypeProfile,
) -> Vec<(String, Category, u32, &'static str)> {
    let mut out = Vec::new();

    if let Some(ch) = profile.meter {
        if !source.energy_metric.is_empty() {
            out.push((source.energy_metric.clone(), Category::Energy, ch, "ENERGY_COUNTER"));
        }
        if !source.power_metric.is_empty() {
            out.push((source.power_metric.clone(), Category::Power, ch, "POWER"));
        }
    }
    if let Some((ch, dp)) = profile.temperature {
        if !source.temperature_metric.is_empty() {
            out.push((source.temperature_metric.clone(), Category::Temperature, ch, dp));
        }
    }
    if let Some((ch, dp)) = profile.light {
        if !source.light_metric.is_empty() {
            out.push((source.light_metric.clone(), Category::Light, ch, dp));
        }
    }

    out
}

/// One datapoint of a Homematic device.
#[derive(Debug, Clone)]
pub struct HomematicDevice {
    script: ScriptClient,
    hm_name: String,
    name: String,
    room: String,
    metric: String,
    category: Category,
    channel: u32,
    datapoint: String,
    interval_secs: u64,
}

#[async_trait]
impl Device for HomematicDevice {
    fn device_id(&self) -> &str {
        &self.hm_name
    }

    fn provider(&self) -> &'static str {
        "homematic"
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
        format!("Homematic({}/{})", self.hm_name, self.name)
    }

    fn full_name(&self) -> String {
        format!(
            "{}[provider:homematic,hm:{},name:{},room:{},interval:{}s]",
            self.metric, self.hm_name, self.name, self.room, self.interval_secs
        )
    }

    async fn fetch(&self) -> Result<f64> {
        let script = format!(
            "var value = dom.GetObject('{}:{}.{}').State();",
            self.hm_name, self.channel, self.datapoint
        );
        let reply = self.script.run(&script).await?;

        let raw = reply
            .get("value")
            .ok_or_else(|| AppError::Parse("reply has no value".to_string()))?;
        parse_reading(raw)
    }
}

async fn read_type(script: &ScriptClient, hm_name: &str) -> Result<String> {
    let reply = script
        .run(&format!(
            "var channel = dom.GetObject('{}:0.UNREACH').Channel();\n\
             var device = dom.GetObject(dom.GetObject(channel).Device());\n\
             var hssType = device.HssType();",
            hm_name
        ))
        .await?;

    match (reply.get("channel"), reply.get("hssType")) {
        (Some(channel), _) if channel == "null" => {
            Err(AppError::Device(format!("unknown device: {}", hm_name)))
        }
        (_, Some(hss_type)) if !hss_type.is_empty() => Ok(hss_type.clone()),
        _ => Err(AppError::Device(format!("no type reported for {}", hm_name))),
    }
}

/// Channel name and room as configured on the CCU.
async fn read_name_and_room(
    script: &ScriptClient,
    hm_name: &str,
    channel: u32,
    datapoint: &str,
) -> Result<(String, String)> {
    let reply = script
        .run(&format!(
            "var channelId = dom.GetObject('{}:{}.{}').Channel();\n\
             var channel = dom.GetObject(channelId);\n\
             var name = channel.Name();\n\
             var room = dom.GetObject(channel.ChnRoom()).Name();",
            hm_name, channel, datapoint
        ))
        .await?;

    let name = reply.get("name").cloned().unwrap_or_default();
    let room = reply.get("room").cloned().unwrap_or_default();
    Ok((name, room))
}

pub async fn load(
    client: &reqwest::Client,
    source: &SourceConfig,
    interval_secs: u64,
    registry: &mut DeviceRegistry,
) {
    let script = ScriptClient::new(client, source);

    for entry in &source.devices {
        let hss_type = match read_type(&script, &entry.hm_name).await {
            Ok(t) => t,
            Err(e) => {
                warn!(hm_name = %entry.hm_name, error = %e, "cannot load homematic device data");
                continue;
            }
        };

        let Some(profile) = profile(&hss_type) else {
            warn!(hm_name = %entry.hm_name, hss_type = %hss_type, "unknown HssType");
            continue;
        };

        let wanted = channels(source, &profile);
        let Some((_, _, first_channel, first_dp)) = wanted.first() else {
            continue;
        };

        let mut name = entry.name.clone();
        let mut room = entry.room.clone();
        if name.is_empty() || room.is_empty() {
            match read_name_and_room(&script, &entry.hm_name, *first_channel, first_dp).await {
                Ok((ccu_name, ccu_room)) => {
                    if name.is_empty() {
                        name = ccu_name;
                    }
                    if room.is_empty() {
                        room = ccu_room;
                    }
                }
                Err(e) => {
                    warn!(hm_name = %entry.hm_name, error = %e, "cannot read name and room");
                    continue;
                }
            }
        }

        info!(hm_name = %entry.hm_name, hss_type = %hss_type, name = %name, room = %room, "found device");

        for (metric, category, channel, datapoint) in wanted {
            registry.add(Arc::new(HomematicDevice {
                script: script.clone(),
                hm_name: entry.hm_name.clone(),
                name: name.clone(),
                room: room.clone(),
                metric,
                category,
                channel,
                datapoint: datapoint.to_string(),
                interval_secs,
            }));
        }
    }
}
