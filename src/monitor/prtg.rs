//! PRTG `table.json` client.
//!
//! A site's circuits are found by walking core group -> site group -> devices
//! -> sensors, where a circuit sensor is one named exactly like its device.

use super::{Circuit, CircuitInfo, DeviceCircuits, MonitorSession};
use crate::config;
use anyhow::{bail, ensure, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can answer a `table.json` query. Split out from the HTTP
/// client so the lookup walk can run against canned tables.
pub trait TableSource {
    fn table(&self, query: &[(&str, String)]) -> Result<Value>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRow {
    pub objid: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRow {
    pub objid: i64,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorRow {
    pub objid: i64,
    #[serde(default)]
    pub sensor: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message_raw: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub lastvalue: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Groups {
    #[serde(default)]
    groups: Vec<GroupRow>,
}

#[derive(Debug, Deserialize)]
struct Devices {
    #[serde(default)]
    devices: Vec<DeviceRow>,
}

#[derive(Debug, Deserialize)]
struct Sensors {
    #[serde(default)]
    sensors: Vec<SensorRow>,
}

pub struct PrtgSession {
    client: Client,
    server_url: String,
    username: String,
    passhash: String,
}

impl PrtgSession {
    pub fn new(cfg: &config::Monitor) -> Result<Self> {
        ensure!(
            cfg.is_configured(),
            "monitor.server_url and monitor.username must be configured"
        );
        let client = Client::builder()
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .timeout(Duration::from_secs(cfg.request_timeout_seconds.max(1)))
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            client,
            server_url: cfg.server_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            passhash: cfg.passhash.clone(),
        })
    }
}

impl TableSource for PrtgSession {
    fn table(&self, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/api/table.json", self.server_url);
        debug!(?query, "monitoring server query");

        // Strip the URL from errors: it carries the credentials.
        let response = self
            .client
            .get(&url)
            .query(&[("output", "json")])
            .query(query)
            .query(&[
                ("username", self.username.as_str()),
                ("passhash", self.passhash.as_str()),
            ])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("request to monitoring server timed out")
                } else {
                    anyhow::Error::new(e.without_url())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("monitoring server returned {status}: {snippet}");
        }

        response
            .json::<Value>()
            .map_err(|e| anyhow::Error::new(e.without_url()))
            .with_context(|| "decoding monitoring server JSON")
    }
}

impl MonitorSession for PrtgSession {
    fn fetch_circuit_info(&self, site_label: &str, core_label: &str) -> CircuitInfo {
        lookup_circuits(self, site_label, core_label)
    }

    fn test_connection(&self) -> Result<String> {
        self.table(&[("content", "sensors".into()), ("count", "1".into())])
            .with_context(|| format!("connecting to {}", self.server_url))?;
        Ok(format!("connected to monitoring server at {}", self.server_url))
    }
}

/// Walks the group tree for `site_label` under `core_label` and collects
/// every device's circuit sensors.
pub fn lookup_circuits<S: TableSource + ?Sized>(
    source: &S,
    site_label: &str,
    core_label: &str,
) -> CircuitInfo {
    match walk(source, site_label, core_label) {
        Ok(info) => info,
        Err(e) => {
            warn!("circuit lookup failed for site '{site_label}' core '{core_label}': {e:#}");
            CircuitInfo::failure(format!(
                "monitoring server error for site '{site_label}' (core '{core_label}'): {e:#}"
            ))
        }
    }
}

fn walk<S: TableSource + ?Sized>(source: &S, site: &str, core: &str) -> Result<CircuitInfo> {
    let cores: Groups = fetch(
        source,
        &[
            ("content", "groups".into()),
            ("columns", "objid,name".into()),
            ("filter_name", format!("@sub({core})")),
        ],
    )?;
    let Some(core_group) = find_group(&cores.groups, core) else {
        return Ok(CircuitInfo::failure(format!(
            "core group '{core}' not found on the monitoring server"
        )));
    };

    let sites: Groups = fetch(
        source,
        &[
            ("content", "groups".into()),
            ("columns", "objid,name,parentid".into()),
            ("filter_name", format!("@sub({site})")),
            ("filter_parentid", core_group.objid.to_string()),
        ],
    )?;
    let Some(site_group) = find_group(&sites.groups, site) else {
        return Ok(CircuitInfo::failure(format!(
            "site group '{site}' not found within core '{core}'"
        )));
    };

    let devices: Devices = fetch(
        source,
        &[
            ("content", "devices".into()),
            ("columns", "objid,device,host,group,status".into()),
            ("filter_parentid", site_group.objid.to_string()),
        ],
    )?;
    if devices.devices.is_empty() {
        return Ok(CircuitInfo::failure(format!(
            "no devices found in group '{site}' (core '{core}')"
        )));
    }

    let mut device_circuits = Vec::new();
    for device in devices.devices.iter().filter(|d| !d.device.trim().is_empty()) {
        let sensors = match fetch::<Sensors, _>(
            source,
            &[
                ("content", "sensors".into()),
                (
                    "columns",
                    "objid,sensor,status,message_raw,message,lastvalue".into(),
                ),
                ("id", device.objid.to_string()),
            ],
        ) {
            Ok(s) => s.sensors,
            Err(e) => {
                warn!(device = %device.device, "sensor query failed: {e:#}");
                Vec::new()
            }
        };

        let circuits = circuits_for_device(device, &sensors);
        if !circuits.is_empty() {
            device_circuits.push(DeviceCircuits {
                device_id: device.objid,
                device_name: device.device.clone(),
                device_host: device.host.clone(),
                device_status: device.status.clone(),
                circuits,
            });
        }
    }

    if device_circuits.is_empty() {
        return Ok(CircuitInfo::failure(format!(
            "no matching circuit sensors found for '{site}' (core '{core}')"
        )));
    }

    info!(site, core, devices = device_circuits.len(), "circuit info retrieved");
    Ok(CircuitInfo {
        success: true,
        message: format!("circuit information retrieved for '{site}' (core '{core}')"),
        device_circuits,
    })
}

fn fetch<T: DeserializeOwned, S: TableSource + ?Sized>(
    source: &S,
    query: &[(&str, String)],
) -> Result<T> {
    let raw = source.table(query)?;
    serde_json::from_value(raw).with_context(|| "unexpected table.json shape")
}

/// Exact, case-insensitive match on the trimmed group name. `@sub()` filters
/// on the server return substring matches too.
pub fn find_group<'a>(groups: &'a [GroupRow], name: &str) -> Option<&'a GroupRow> {
    let wanted = name.trim().to_lowercase();
    groups
        .iter()
        .find(|g| g.name.trim().to_lowercase() == wanted)
}

pub fn circuits_for_device(device: &DeviceRow, sensors: &[SensorRow]) -> Vec<Circuit> {
    let device_name = device.device.trim().to_lowercase();
    sensors
        .iter()
        .filter(|s| s.sensor.trim().to_lowercase() == device_name)
        .map(|s| Circuit {
            id: s.objid,
            name: s.sensor.clone(),
            status: s.status.clone(),
            message: s
                .message_raw
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| s.message.clone()),
            last_value: s.lastvalue.as_ref().and_then(value_text),
        })
        .collect()
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
