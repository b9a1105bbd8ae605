use std::fmt;
use std::str::FromStr;

use crate::UnitParseError;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// An amount of memory, stored as a byte count.
///
/// Parses strings like `4 GB`, `512MB`, `4.GB`, `1.5g` or a bare byte count.
/// Units are binary (1 KB = 1024 B), matching what grid schedulers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemoryUnit {
    bytes: u64,
}

impl MemoryUnit {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub const fn from_mega(mega: u64) -> Self {
        Self { bytes: mega << 20 }
    }

    pub const fn from_giga(giga: u64) -> Self {
        Self { bytes: giga << 30 }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Whole mebibytes, rounded up so a request is never smaller than asked for.
    pub fn to_mega(&self) -> u64 {
        self.bytes.div_ceil(1 << 20)
    }

    /// Value in the largest unit that represents it exactly, plus the unit index.
    fn exact(&self) -> (u64, usize) {
        let mut value = self.bytes;
        let mut unit = 0;
        while unit < UNITS.len() - 1 && value != 0 && value % 1024 == 0 {
            value /= 1024;
            unit += 1;
        }
        (value, unit)
    }

    /// Compact form without whitespace or trailing `B`, e.g. `4G`, `512M`, `100`.
    pub fn compact(&self) -> String {
        let (value, unit) = self.exact();
        let suffix = UNITS[unit].trim_end_matches('B');
        format!("{value}{suffix}")
    }
}

impl fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = self.exact();
        write!(f, "{value} {}", UNITS[unit])
    }
}

impl FromStr for MemoryUnit {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || UnitParseError::Memory(s.to_owned());
        let text = s.trim();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (num, unit) = text.split_at(split);
        if num.is_empty() {
            return Err(err());
        }
        let num: f64 = num.parse().map_err(|_| err())?;

        let shift = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" => 10,
            "M" | "MB" => 20,
            "G" | "GB" => 30,
            "T" | "TB" => 40,
            _ => return Err(err()),
        };
        let bytes = num * (1u64 << shift) as f64;
        if !bytes.is_finite() || bytes < 0.0 {
            return Err(err());
        }
        Ok(Self::from_bytes(bytes.round() as u64))
    }
}
