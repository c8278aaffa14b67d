//! One ICMP probe against one host, by way of the platform `ping` utility.
//!
//! Everything that can go wrong at run time (missing binary, hung process,
//! garbage output) ends up as a failed [`ProbeResult`]; only invalid
//! [`ProbeParams`] are reported as errors.

pub mod decode;
pub mod parse;
mod process;

use crate::config;
use anyhow::{ensure, Result};
use decode::Encoding;
use parse::{Flavor, RoundTrip};
use serde::Serialize;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack added to the per-echo timeout to get the hard limit for a whole run.
pub const TIME_LIMIT_MARGIN: Duration = Duration::from_secs(2);

pub const TIME_LIMIT_ERROR: &str = "probe exceeded time limit";
pub const FULL_LOSS_ERROR: &str = "host answered the ping command but with 100% packet loss";

const TIMEOUT_MARKERS: [&str; 2] = ["Request timed out", "Esgotado o tempo limite"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeParams {
    count: u32,
    timeout_seconds: f64,
}

impl ProbeParams {
    pub fn new(count: u32, timeout_seconds: f64) -> Result<Self> {
        ensure!(count >= 1, "probe count must be at least 1, got {count}");
        ensure!(
            timeout_seconds.is_finite() && timeout_seconds > 0.0,
            "probe timeout must be a positive number of seconds, got {timeout_seconds}"
        );
        ensure!(
            Duration::try_from_secs_f64(timeout_seconds)
                .ok()
                .and_then(|d| d.checked_add(TIME_LIMIT_MARGIN))
                .is_some(),
            "probe timeout of {timeout_seconds}s is out of range"
        );
        Ok(Self {
            count,
            timeout_seconds,
        })
    }

    pub fn from_config(cfg: &config::Probe) -> Result<Self> {
        Self::new(cfg.count, cfg.timeout_seconds)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds) + TIME_LIMIT_MARGIN
    }

    fn per_echo_millis(&self) -> u64 {
        (self.timeout_seconds * 1000.0).round().max(1.0) as u64
    }

    fn per_echo_seconds(&self) -> u64 {
        self.timeout_seconds.ceil().max(1.0) as u64
    }
}

/// Outcome of one probe. A successful result always has loss below 100% and
/// no error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    host: String,
    success: bool,
    min_time_ms: Option<f64>,
    avg_time_ms: Option<f64>,
    max_time_ms: Option<f64>,
    packet_loss_percent: u8,
    error: Option<String>,
}

impl ProbeResult {
    /// A host that answered. Loss of 100% cannot be reachable and is turned
    /// into a failure.
    pub fn reachable(host: &str, packet_loss_percent: u8, round_trip: Option<RoundTrip>) -> Self {
        if packet_loss_percent >= 100 {
            return Self::failed(host, FULL_LOSS_ERROR);
        }
        Self {
            host: host.to_string(),
            success: true,
            min_time_ms: round_trip.map(|r| r.min_ms),
            avg_time_ms: round_trip.map(|r| r.avg_ms),
            max_time_ms: round_trip.map(|r| r.max_ms),
            packet_loss_percent,
            error: None,
        }
    }

    pub fn failed(host: &str, error: impl Into<String>) -> Self {
        Self::failed_with(host, error.into(), 100, None)
    }

    fn failed_with(
        host: &str,
        error: String,
        packet_loss_percent: u8,
        round_trip: Option<RoundTrip>,
    ) -> Self {
        Self {
            host: host.to_string(),
            success: false,
            min_time_ms: round_trip.map(|r| r.min_ms),
            avg_time_ms: round_trip.map(|r| r.avg_ms),
            max_time_ms: round_trip.map(|r| r.max_ms),
            packet_loss_percent: packet_loss_percent.min(100),
            error: Some(error),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn min_time_ms(&self) -> Option<f64> {
        self.min_time_ms
    }

    pub fn avg_time_ms(&self) -> Option<f64> {
        self.avg_time_ms
    }

    pub fn max_time_ms(&self) -> Option<f64> {
        self.max_time_ms
    }

    pub fn packet_loss_percent(&self) -> u8 {
        self.packet_loss_percent
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Something that can probe a host. The batch scheduler is generic over this
/// so tests can substitute canned results.
pub trait Prober: Send + Sync {
    fn probe(&self, host: &str, params: &ProbeParams) -> ProbeResult;
}

/// Probes by running the system ping utility.
#[derive(Debug, Clone)]
pub struct SystemPing {
    program: String,
    leading_args: Vec<String>,
    flavor: Flavor,
    encodings: Vec<Encoding>,
}

impl SystemPing {
    pub fn new(flavor: Flavor) -> Self {
        Self {
            program: "ping".into(),
            leading_args: Vec::new(),
            flavor,
            encodings: default_encodings(flavor),
        }
    }

    pub fn from_config(cfg: &config::Probe) -> Result<Self> {
        let flavor = Flavor::parse(&cfg.flavor)?;
        let encodings = if cfg.encodings.is_empty() {
            default_encodings(flavor)
        } else {
            cfg.encodings
                .iter()
                .map(|e| Encoding::parse(e))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            program: cfg.program.clone(),
            leading_args: cfg.leading_args.clone(),
            flavor,
            encodings,
        })
    }

    /// Replaces the program and the arguments that precede the ping flags.
    pub fn with_command(mut self, program: impl Into<String>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Full argument list handed to the program for `host`.
    pub fn command_args(&self, host: &str, params: &ProbeParams) -> Vec<String> {
        let mut args = self.leading_args.clone();
        match self.flavor {
            Flavor::Windows => args.extend([
                "-n".to_string(),
                params.count().to_string(),
                "-w".to_string(),
                params.per_echo_millis().to_string(),
            ]),
            Flavor::Unix => args.extend([
                "-c".to_string(),
                params.count().to_string(),
                "-W".to_string(),
                params.per_echo_seconds().to_string(),
            ]),
        }
        args.push(host.to_string());
        args
    }
}

impl Prober for SystemPing {
    fn probe(&self, host: &str, params: &ProbeParams) -> ProbeResult {
        let host = host.trim();
        if host.is_empty() || host.starts_with('-') || host.chars().any(char::is_whitespace) {
            return ProbeResult::failed(host, format!("invalid host: {host:?}"));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(host, params));
        debug!(host, program = %self.program, limit = ?params.time_limit(), "running probe");

        let limit = params.time_limit();
        match process::run_with_limit(cmd, limit) {
            Ok(process::RunOutcome::Exited {
                status,
                stdout,
                stderr,
            }) => {
                let stdout = decode::decode_output(&stdout, &self.encodings);
                let stderr = decode::decode_output(&stderr, &self.encodings);
                interpret_transcript(host, self.flavor, status.code(), &stdout, &stderr)
            }
            Ok(process::RunOutcome::TimedOut { stdout, stderr }) => {
                let mut error = format!("{TIME_LIMIT_ERROR} ({}s)", limit.as_secs_f64());
                let stderr = decode::decode_output(&stderr, &self.encodings);
                let stdout = decode::decode_output(&stdout, &self.encodings);
                if !stderr.trim().is_empty() {
                    error.push_str(&format!("; partial stderr: {}", stderr.trim()));
                }
                if !stdout.trim().is_empty() {
                    error.push_str(&format!("; partial output: {}", stdout.trim()));
                }
                ProbeResult::failed(host, error)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program = %self.program, "ping program not found");
                ProbeResult::failed(
                    host,
                    format!(
                        "ping program '{}' not found; check the installation and PATH",
                        self.program
                    ),
                )
            }
            Err(e) => ProbeResult::failed(host, format!("failed to run ping: {e}")),
        }
    }
}

/// Turns a finished ping run into a result. `exit_code` is `None` when the
/// process was ended by a signal.
pub fn interpret_transcript(
    host: &str,
    flavor: Flavor,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> ProbeResult {
    let stats = parse::parse_transcript(flavor, stdout);

    match exit_code {
        Some(0) if stats.packet_loss_percent < 100 => {
            ProbeResult::reachable(host, stats.packet_loss_percent, stats.round_trip)
        }
        Some(0) => {
            let first_line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
            let error = match first_line {
                Some(line) if TIMEOUT_MARKERS.iter().any(|m| line.contains(m)) => line.to_string(),
                _ => FULL_LOSS_ERROR.to_string(),
            };
            ProbeResult::failed(host, error)
        }
        other => {
            let mut error = match other {
                Some(code) => format!("ping exited with code {code}"),
                None => "ping was terminated by a signal".to_string(),
            };
            if !stderr.trim().is_empty() {
                error.push_str(&format!(" - error: {}", stderr.trim()));
            } else if !stdout.trim().is_empty() {
                error.push_str(&format!(" - output: {}", stdout.trim()));
            }
            ProbeResult::failed_with(host, error, stats.packet_loss_percent, stats.round_trip)
        }
    }
}

fn default_encodings(flavor: Flavor) -> Vec<Encoding> {
    match flavor {
        Flavor::Windows => decode::WINDOWS_ORDER.to_vec(),
        Flavor::Unix => decode::UNIX_ORDER.to_vec(),
    }
}

impl<P: Prober + ?Sized> Prober for std::sync::Arc<P> {
    fn probe(&self, host: &str, params: &ProbeParams) -> ProbeResult {
        (**self).probe(host, params)
    }
}
