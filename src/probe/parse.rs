use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::trace;

/// Which family of ping utility produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flavor {
    Windows,
    Unix,
}

impl Flavor {
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Flavor::Windows
        } else {
            Flavor::Unix
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::host()),
            "windows" => Ok(Flavor::Windows),
            "unix" | "linux" | "macos" => Ok(Flavor::Unix),
            other => anyhow::bail!("unknown probe flavor: {other}"),
        }
    }

    /// Pattern sets to try, in order.
    pub fn parsers(self) -> &'static [&'static dyn TranscriptParser] {
        match self {
            Flavor::Windows => &WINDOWS_PARSERS,
            Flavor::Unix => &UNIX_PARSERS,
        }
    }
}

static WINDOWS_PARSERS: [&dyn TranscriptParser; 2] = [&WindowsPortuguese, &WindowsEnglish];
static UNIX_PARSERS: [&dyn TranscriptParser; 1] = [&UnixSummary];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// One locale's worth of summary patterns for a ping utility.
pub trait TranscriptParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn packet_loss(&self, text: &str) -> Option<u8>;
    fn round_trip(&self, text: &str) -> Option<RoundTrip>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscriptStats {
    /// 100 when no pattern matched.
    pub packet_loss_percent: u8,
    pub round_trip: Option<RoundTrip>,
}

pub fn parse_transcript(flavor: Flavor, text: &str) -> TranscriptStats {
    let parsers = flavor.parsers();
    let loss = parsers
        .iter()
        .find_map(|p| p.packet_loss(text).map(|loss| (p.name(), loss)));
    if let Some((name, loss)) = loss {
        trace!(parser = name, loss, "packet loss matched");
    }
    TranscriptStats {
        packet_loss_percent: loss.map(|(_, l)| l).unwrap_or(100),
        round_trip: parsers.iter().find_map(|p| p.round_trip(text)),
    }
}

static PT_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Perdidos\s*=\s*\d+\s*\((\d+)%\s*de\s*perda\)").expect("static regex")
});
static PT_TIMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)M[ií]nimo\s*=\s*(\d+)ms,\s*M[aá]ximo\s*=\s*(\d+)ms,\s*M[eé]dia\s*=\s*(\d+)ms",
    )
    .expect("static regex")
});
static EN_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Lost\s*=\s*\d+\s*\((\d+)%\s*loss\)").expect("static regex")
});
static EN_LOSS_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)%\s*loss").expect("static regex"));
static EN_TIMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Minimum\s*=\s*(\d+)ms,\s*Maximum\s*=\s*(\d+)ms,\s*Average\s*=\s*(\d+)ms")
        .expect("static regex")
});
static UNIX_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)%\s*packet\s*loss").expect("static regex")
});
static UNIX_TIMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max/(?:mdev|stddev)\s*=\s*([\d.]+)/([\d.]+)/([\d.]+)")
        .expect("static regex")
});

/// `ping.exe` with a Portuguese (pt-BR) console.
pub struct WindowsPortuguese;

impl TranscriptParser for WindowsPortuguese {
    fn name(&self) -> &'static str {
        "windows-pt"
    }

    fn packet_loss(&self, text: &str) -> Option<u8> {
        capture_percent(&PT_LOSS, text)
    }

    // Summary order is min, max, avg.
    fn round_trip(&self, text: &str) -> Option<RoundTrip> {
        let [min_ms, max_ms, avg_ms] = capture_triple(&PT_TIMES, text)?;
        Some(RoundTrip {
            min_ms,
            avg_ms,
            max_ms,
        })
    }
}

/// `ping.exe` with an English console.
pub struct WindowsEnglish;

impl TranscriptParser for WindowsEnglish {
    fn name(&self) -> &'static str {
        "windows-en"
    }

    fn packet_loss(&self, text: &str) -> Option<u8> {
        capture_percent(&EN_LOSS, text).or_else(|| capture_percent(&EN_LOSS_BARE, text))
    }

    fn round_trip(&self, text: &str) -> Option<RoundTrip> {
        let [min_ms, max_ms, avg_ms] = capture_triple(&EN_TIMES, text)?;
        Some(RoundTrip {
            min_ms,
            avg_ms,
            max_ms,
        })
    }
}

/// iputils / BSD ping summary lines.
pub struct UnixSummary;

impl TranscriptParser for UnixSummary {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn packet_loss(&self, text: &str) -> Option<u8> {
        capture_percent(&UNIX_LOSS, text)
    }

    fn round_trip(&self, text: &str) -> Option<RoundTrip> {
        let [min_ms, avg_ms, max_ms] = capture_triple(&UNIX_TIMES, text)?;
        Some(RoundTrip {
            min_ms,
            avg_ms,
            max_ms,
        })
    }
}

fn capture_percent(re: &Regex, text: &str) -> Option<u8> {
    let raw = re.captures(text)?.get(1)?.as_str();
    let value: f64 = raw.parse().ok()?;
    let rounded = value.round().clamp(0.0, 100.0);
    // Anything short of total loss must stay below 100 after rounding.
    if value < 100.0 {
        Some(rounded.min(99.0) as u8)
    } else {
        Some(rounded as u8)
    }
}

fn capture_triple(re: &Regex, text: &str) -> Option<[f64; 3]> {
    let caps = re.captures(text)?;
    let mut out = [0.0; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = caps.get(i + 1)?.as_str().parse().ok()?;
    }
    Some(out)
}
