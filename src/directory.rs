//! CSV-backed site directory.

use crate::probe::decode::Encoding;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

/// One retail site. Column names from older exports are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(alias = "ID_Loja")]
    pub site_id: String,
    #[serde(alias = "Nome_Loja")]
    pub name: String,
    /// Monitoring-server core group the site lives under.
    #[serde(alias = "Core_PRTG")]
    pub core: String,
    #[serde(alias = "Cidade", default)]
    pub city: String,
    #[serde(alias = "Estado", default)]
    pub state: String,
    #[serde(alias = "Contato_Gerencia", default)]
    pub manager_contact: String,
    #[serde(alias = "Telefone", default)]
    pub phone: String,
}

impl Site {
    /// Label used for the site on the monitoring server: the first number in
    /// the name, zero-padded after `prefix` ("Loja 10" -> "LJ010"). Names
    /// without a number are used as-is.
    pub fn monitor_label(&self, prefix: &str, digits: usize) -> String {
        match first_number(&self.name) {
            Some(n) => format!("{prefix}{n:0digits$}"),
            None => self.name.clone(),
        }
    }

    /// Store number from the id, falling back to the name.
    pub fn store_number(&self) -> Option<u32> {
        first_number(&self.site_id).or_else(|| first_number(&self.name))
    }
}

fn first_number(s: &str) -> Option<u32> {
    DIGITS.find(s)?.as_str().parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SiteMatch {
    None,
    One(Site),
    Many(Vec<Site>),
}

#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    sites: Vec<Site>,
}

impl SiteDirectory {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Loads a CSV export. UTF-8 is expected; Latin-1 files from older
    /// spreadsheets are accepted too.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading site directory: {}", path.display()))?;
        let text = match Encoding::Utf8.decode(&bytes) {
            Some(text) => text,
            None => {
                warn!("{} is not UTF-8; reading as Latin-1", path.display());
                Encoding::Latin1.decode(&bytes).unwrap_or_default()
            }
        };
        let dir = Self::from_csv(&text)
            .with_context(|| format!("parsing site directory: {}", path.display()))?;
        debug!(sites = dir.len(), "site directory loaded");
        Ok(dir)
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());
        let sites = reader
            .deserialize::<Site>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { sites })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Exact id match first; otherwise a case- and accent-insensitive
    /// substring match on the name.
    pub fn find(&self, term: &str) -> SiteMatch {
        let term = term.trim();
        if term.is_empty() {
            return SiteMatch::None;
        }

        if let Some(site) = self.sites.iter().find(|s| s.site_id == term) {
            return SiteMatch::One(site.clone());
        }

        let needle = fold(term);
        let mut hits: Vec<Site> = self
            .sites
            .iter()
            .filter(|s| fold(&s.name).contains(&needle))
            .cloned()
            .collect();
        match hits.len() {
            0 => SiteMatch::None,
            1 => SiteMatch::One(hits.remove(0)),
            _ => SiteMatch::Many(hits),
        }
    }
}

fn fold(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}
