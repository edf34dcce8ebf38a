use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised for an enforcement mode outside the known set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid enforcement mode {mode:?}, expected NONE, LB, CPU_QUOTA, CPU_SHARE or BOTH")]
pub struct ParseEnforcementError {
    mode: String,
}

/// Enforcement strategy driven by the controller. Exactly one loop runs per
/// process lifetime.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Enforcement {
    /// Observe and log utilizations without acting on them.
    None,
    /// Steer traffic through load-balancer weights only.
    Lb,
    /// Enforce CFS quotas.
    CpuQuota,
    /// Enforce cpu.shares credits.
    CpuShare,
    /// Enforce quotas and shares together.
    Both,
}

impl Enforcement {
    /// Whether startup pushes default kernel state before the loop begins.
    #[must_use]
    pub const fn needs_defaults(self) -> bool {
        matches!(self, Self::CpuQuota | Self::CpuShare | Self::Both)
    }

    /// Whether the round emits `applyCPUQuotas`.
    #[must_use]
    pub const fn applies_quotas(self) -> bool {
        matches!(self, Self::CpuQuota | Self::Both)
    }

    /// Whether the round emits `applyCPUShares`.
    #[must_use]
    pub const fn applies_shares(self) -> bool {
        matches!(self, Self::CpuShare | Self::Both)
    }

    /// Lowercase tag used in round-log file names.
    #[must_use]
    pub const fn file_tag(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lb => "lb",
            Self::CpuQuota => "cpu_quota",
            Self::CpuShare => "cpu_share",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for Enforcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            Self::None => "NONE",
            Self::Lb => "LB",
            Self::CpuQuota => "CPU_QUOTA",
            Self::CpuShare => "CPU_SHARE",
            Self::Both => "BOTH",
        };
        f.write_str(mode)
    }
}

impl FromStr for Enforcement {
    type Err = ParseEnforcementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "LB" => Ok(Self::Lb),
            "CPU_QUOTA" => Ok(Self::CpuQuota),
            "CPU_SHARE" => Ok(Self::CpuShare),
            "BOTH" => Ok(Self::Both),
            other => Err(ParseEnforcementError {
                mode: other.to_owned(),
            }),
        }
    }
}
