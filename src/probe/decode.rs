//! Text decoding for captured ping output.
//!
//! The Windows console writes in the OEM code page (CP850 on the machines we
//! care about), Unix hosts write UTF-8, and some wrappers emit Latin-1.
//! Decoding walks a configured order of encodings and finally falls back to a
//! lossy UTF-8 decode, so it never fails.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Utf8,
    Cp850,
    Latin1,
}

impl Encoding {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "cp850" | "ibm850" | "dos-850" => Ok(Encoding::Cp850),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => bail!("unsupported encoding: {other}"),
        }
    }

    /// Strict decode; `None` when the bytes are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Cp850 => Some(
                bytes
                    .iter()
                    .map(|&b| {
                        if b < 0x80 {
                            b as char
                        } else {
                            CP850_HIGH[(b - 0x80) as usize]
                        }
                    })
                    .collect(),
            ),
        }
    }

    /// Encodes `text`, or `None` if some character has no mapping.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 => Some(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
            Encoding::Cp850 => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        Some(c as u8)
                    } else {
                        CP850_HIGH
                            .iter()
                            .position(|&h| h == c)
                            .map(|i| 0x80 + i as u8)
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Cp850 => "cp850",
            Encoding::Latin1 => "latin-1",
        };
        f.write_str(name)
    }
}

pub const WINDOWS_ORDER: [Encoding; 3] = [Encoding::Cp850, Encoding::Latin1, Encoding::Utf8];
pub const UNIX_ORDER: [Encoding; 3] = [Encoding::Utf8, Encoding::Cp850, Encoding::Latin1];

/// Decodes with the first encoding in `order` that accepts the bytes.
pub fn decode_output(bytes: &[u8], order: &[Encoding]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    order
        .iter()
        .find_map(|enc| enc.decode(bytes))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

// 0x80..=0xFF of IBM code page 850.
const CP850_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '®', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐', //
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤', //
    'ð', 'Ð', 'Ê', 'Ë', 'È', 'ı', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀', //
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ', 'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´', //
    '\u{AD}', '±', '‗', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■', '\u{A0}',
];
