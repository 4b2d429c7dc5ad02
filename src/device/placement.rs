//! Device placement strings
//!
//! Accepts `/cpu:0`, `/GPU:1` and `/device:GPU:0`, case-insensitively.
//! A bare `cpu` or `gpu` means index 0. Job and task prefixes are rejected.

use std::fmt;
use std::str::FromStr;

use super::DeviceKind;
use crate::error::BenchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub kind: DeviceKind,
    pub index: usize,
}

impl Placement {
    pub const fn cpu(index: usize) -> Self {
        Self {
            kind: DeviceKind::Cpu,
            index,
        }
    }

    pub const fn gpu(index: usize) -> Self {
        Self {
            kind: DeviceKind::Gpu,
            index,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/device:{}:{}", self.kind, self.index)
    }
}

impl FromStr for Placement {
    type Err = BenchError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BenchError::InvalidPlacement {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = spec.trim();
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let body = body
            .strip_prefix("device:")
            .or_else(|| body.strip_prefix("DEVICE:"))
            .unwrap_or(body);

        let (kind, index) = match body.split_once(':') {
            Some((kind, index)) => (kind, Some(index)),
            None => (body, None),
        };

        let kind = match kind.to_ascii_lowercase().as_str() {
            "cpu" => DeviceKind::Cpu,
            "gpu" => DeviceKind::Gpu,
            "" => return Err(invalid("missing device type")),
            _ => return Err(invalid("device type must be CPU or GPU")),
        };

        let index = match index {
            None => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| invalid("device index must be a non-negative integer"))?,
        };

        Ok(Self { kind, index })
    }
}
