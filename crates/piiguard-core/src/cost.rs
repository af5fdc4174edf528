//! Argon2id cost tags.
//!
//! A cost is written as `m=<mem_cost_kib>,t=<time_cost>,p=<parallelism>`.
//! The tag travels inside config files and self-describing ciphertexts, so a
//! blob produced under an older cost can still be opened after the default
//! changes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::PiiguardError;

/// Argon2id parameters for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KdfCost {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl KdfCost {
    pub const fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        }
    }

    /// Cheap parameters for tests and benches. Never use for stored data.
    pub const fn insecure_fast() -> Self {
        Self::new(1024, 1, 1)
    }

    /// Component-wise maximum of two costs.
    pub fn max(self, other: Self) -> Self {
        Self::new(
            self.mem_cost_kib.max(other.mem_cost_kib),
            self.time_cost.max(other.time_cost),
            self.parallelism.max(other.parallelism),
        )
    }

    /// True when no component exceeds the matching component of `ceiling`.
    ///
    /// Costs read back from stored ciphertexts are checked against a ceiling
    /// before any derivation runs.
    pub fn within(&self, ceiling: &Self) -> bool {
        self.mem_cost_kib <= ceiling.mem_cost_kib
            && self.time_cost <= ceiling.time_cost
            && self.parallelism <= ceiling.parallelism
    }
}

impl Default for KdfCost {
    fn default() -> Self {
        Self::new(65536, 3, 4)
    }
}

impl fmt::Display for KdfCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m={},t={},p={}",
            self.mem_cost_kib, self.time_cost, self.parallelism
        )
    }
}

impl FromStr for KdfCost {
    type Err = PiiguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mem = None;
        let mut time = None;
        let mut lanes = None;

        for part in s.trim().split(',') {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| PiiguardError::Config(format!("malformed cost segment: {part:?}")))?;
            let value: u32 = value
                .trim()
                .parse()
                .map_err(|e| PiiguardError::Config(format!("cost {name}: {e}")))?;
            match name.trim() {
                "m" => mem = Some(value),
                "t" => time = Some(value),
                "p" => lanes = Some(value),
                other => {
                    return Err(PiiguardError::Config(format!(
                        "unknown cost parameter: {other:?}"
                    )))
                }
            }
        }

        match (mem, time, lanes) {
            (Some(m), Some(t), Some(p)) => Ok(KdfCost::new(m, t, p)),
            _ => Err(PiiguardError::Config(format!(
                "cost must set m, t and p: {s:?}"
            ))),
        }
    }
}

impl Serialize for KdfCost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KdfCost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
