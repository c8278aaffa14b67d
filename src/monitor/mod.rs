pub mod prtg;

use serde::{Deserialize, Serialize};

pub use prtg::PrtgSession;

/// Circuit and sensor status of one site as known by the monitoring server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub success: bool,
    pub message: String,
    pub device_circuits: Vec<DeviceCircuits>,
}

impl CircuitInfo {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            device_circuits: Vec::new(),
        }
    }

    /// Distinct device hosts in order of first appearance. Empty when the
    /// lookup failed.
    pub fn link_hosts(&self) -> Vec<String> {
        if !self.success {
            return Vec::new();
        }
        let mut hosts: Vec<String> = Vec::new();
        for device in &self.device_circuits {
            let Some(host) = device.device_host.as_deref().map(str::trim) else {
                continue;
            };
            if !host.is_empty() && !hosts.iter().any(|h| h == host) {
                hosts.push(host.to_string());
            }
        }
        hosts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCircuits {
    pub device_id: i64,
    pub device_name: String,
    pub device_host: Option<String>,
    pub device_status: Option<String>,
    pub circuits: Vec<Circuit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: i64,
    pub name: String,
    pub status: Option<String>,
    pub message: Option<String>,
    pub last_value: Option<String>,
}

/// Client for the monitoring server. Implementations report failures inside
/// [`CircuitInfo`] rather than as errors.
pub trait MonitorSession: Send + Sync {
    fn fetch_circuit_info(&self, site_label: &str, core_label: &str) -> CircuitInfo;

    /// Cheap request to verify URL and credentials. Returns a status line.
    fn test_connection(&self) -> anyhow::Result<String>;
}

impl<M: MonitorSession + ?Sized> MonitorSession for std::sync::Arc<M> {
    fn fetch_circuit_info(&self, site_label: &str, core_label: &str) -> CircuitInfo {
        (**self).fetch_circuit_info(site_label, core_label)
    }

    fn test_connection(&self) -> anyhow::Result<String> {
        (**self).test_connection()
    }
}
