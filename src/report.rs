use crate::{batch::BatchResultSet, monitor::CircuitInfo, probe::ProbeResult};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub title: String,
    pub started: String,
    pub finished: String,
    pub body: ReportBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportBody {
    Probes { rows: Vec<ProbeRow> },
    Circuits { info: CircuitInfo },
}

/// One requested host. `result` is `None` when the job never ran.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRow {
    pub label: Option<String>,
    pub host: String,
    pub result: Option<ProbeResult>,
}

impl ProbeRow {
    /// Rows in submission order; `labels` maps correlation keys to display
    /// names.
    pub fn from_batch(set: &BatchResultSet, labels: impl Fn(&str) -> Option<String>) -> Vec<Self> {
        set.entries()
            .map(|(submitted, result)| ProbeRow {
                label: labels(&submitted.key),
                host: submitted.host.clone(),
                result: result.cloned(),
            })
            .collect()
    }
}

impl OperationReport {
    pub fn render_text(&self) -> String {
        let mut out = format!("--- {} ---\n", self.title);
        match &self.body {
            ReportBody::Probes { rows } => render_probe_rows(&mut out, rows),
            ReportBody::Circuits { info } => render_circuits(&mut out, info),
        }
        out
    }
}

fn render_probe_rows(out: &mut String, rows: &[ProbeRow]) {
    for row in rows {
        out.push('\n');
        match &row.label {
            Some(label) => {
                let _ = writeln!(out, "Host: {label} (IP: {})", row.host);
            }
            None => {
                let _ = writeln!(out, "Host: {}", row.host);
            }
        }
        let _ = writeln!(out, "  Status: {}", status_line(row.result.as_ref()));
    }
}

pub fn status_line(result: Option<&ProbeResult>) -> String {
    match result {
        None => "Not processed".to_string(),
        Some(r) if r.success() => format!(
            "Online, Avg: {} ms, Loss: {} %",
            r.avg_time_ms()
                .map(format_ms)
                .unwrap_or_else(|| "N/A".to_string()),
            r.packet_loss_percent()
        ),
        Some(r) => format!("Offline / Error ({})", r.error().unwrap_or("unknown")),
    }
}

fn format_ms(ms: f64) -> String {
    if ms.fract() == 0.0 {
        format!("{ms:.0}")
    } else {
        format!("{ms:.3}")
    }
}

fn render_circuits(out: &mut String, info: &CircuitInfo) {
    if !info.success {
        let _ = writeln!(out, "Error fetching monitoring data: {}", info.message);
        return;
    }
    if info.device_circuits.is_empty() {
        out.push_str("No device with matching circuit sensors was found.\n");
        return;
    }
    for dev in &info.device_circuits {
        let _ = writeln!(
            out,
            "Device: {} (Host: {}, Status: {})",
            dev.device_name,
            dev.device_host.as_deref().unwrap_or("N/A"),
            dev.device_status.as_deref().unwrap_or("N/A")
        );
        for (i, c) in dev.circuits.iter().enumerate() {
            let _ = writeln!(out, "  {}. Sensor: {}", i + 1, c.name);
            let _ = writeln!(out, "     Status: {}", c.status.as_deref().unwrap_or("N/A"));
            let _ = writeln!(out, "     Message: {}", c.message.as_deref().unwrap_or("N/A"));
            let _ = writeln!(
                out,
                "     Last value: {}",
                c.last_value.as_deref().unwrap_or("N/A")
            );
        }
        out.push('\n');
    }
}
