use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub directory: Directory,
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default)]
    pub vms: Vms,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub count: u32,
    pub timeout_seconds: f64,
    pub program: String,
    /// Arguments placed before the ping flags, e.g. `["netns", "exec", "store"]`
    /// when `program = "ip"`.
    pub leading_args: Vec<String>,
    /// `auto`, `windows` or `unix`.
    pub flavor: String,
    /// Decode order for captured output. Empty means the platform default.
    pub encodings: Vec<String>,
}
impl Default for Probe {
    fn default() -> Self {
        Self {
            count: 4,
            timeout_seconds: 2.0,
            program: "ping".into(),
            leading_args: Vec::new(),
            flavor: "auto".into(),
            encodings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Batch {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
}
impl Default for Batch {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Directory {
    pub csv_path: String,
}
impl Default for Directory {
    fn default() -> Self {
        Self {
            csv_path: "data/sites.csv".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitor {
    pub server_url: String,
    pub username: String,
    pub passhash: String,
    pub verify_tls: bool,
    pub request_timeout_seconds: u64,
    pub site_label_prefix: String,
    pub site_label_digits: usize,
}
impl Default for Monitor {
    fn default() -> Self {
        Self {
            server_url: "".into(),
            username: "".into(),
            passhash: "".into(),
            verify_tls: false,
            request_timeout_seconds: 15,
            site_label_prefix: "LJ".into(),
            site_label_digits: 3,
        }
    }
}

impl Monitor {
    pub fn is_configured(&self) -> bool {
        !self.server_url.trim().is_empty() && !self.username.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Vms {
    pub hosts: Vec<VmHost>,
}
impl Default for Vms {
    fn default() -> Self {
        Self {
            hosts: vec![
                VmHost::new("Gateway", "192.168.{n}.1"),
                VmHost::new("API", "192.168.{n}.2"),
                VmHost::new("DB", "192.168.{n}.3"),
                VmHost::new("Manager", "192.168.{n}.4"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmHost {
    pub name: String,
    /// Address template; `{n}` is replaced with the store number.
    pub template: String,
}

impl VmHost {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    pub fn address(&self, store_number: u32) -> String {
        self.template.replace("{n}", &store_number.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "logs/storewatch.log".into(),
        }
    }
}
