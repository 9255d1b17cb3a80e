//! Risk, trust and isolation classifications.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Potential impact of an action, from 1 (negligible) to 5 (critical).
///
/// Drives both the approval policy and whether a checkpoint is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RiskLevel(u8);

impl RiskLevel {
    /// Lowest risk level.
    pub const MIN: Self = Self(1);
    /// Highest risk level.
    pub const MAX: Self = Self(5);

    /// Create a risk level, rejecting values outside 1..=5.
    #[must_use]
    pub const fn new(level: u8) -> Option<Self> {
        if level >= 1 && level <= 5 {
            Some(Self(level))
        } else {
            None
        }
    }

    /// The numeric level.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(CoreError::InvalidRiskLevel(value))
    }
}

impl From<RiskLevel> for u8 {
    fn from(level: RiskLevel) -> Self {
        level.0
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much prior verification an action's code has undergone.
///
/// Ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Dynamically generated or unknown provenance.
    #[default]
    Unverified,
    /// Passed static verification.
    Verified,
    /// Reviewed and signed off by an operator.
    Trusted,
    /// Ships with the runtime.
    Builtin,
}

impl TrustLevel {
    /// The weakest isolation this trust level may run under.
    #[must_use]
    pub const fn isolation_floor(self) -> IsolationType {
        match self {
            Self::Unverified => IsolationType::Container,
            Self::Verified | Self::Trusted => IsolationType::Subprocess,
            Self::Builtin => IsolationType::Inline,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Verified => write!(f, "verified"),
            Self::Trusted => write!(f, "trusted"),
            Self::Builtin => write!(f, "builtin"),
        }
    }
}

impl FromStr for TrustLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            "trusted" => Ok(Self::Trusted),
            "builtin" => Ok(Self::Builtin),
            other => Err(CoreError::UnknownVariant {
                kind: "trust level",
                value: other.to_string(),
            }),
        }
    }
}

/// Execution boundary, ordered by isolation strength.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationType {
    /// Co-located with the guard, in-process.
    #[default]
    Inline,
    /// A child process with OS resource limits.
    Subprocess,
    /// A container with its own namespaces and cgroup limits.
    Container,
}

impl IsolationType {
    /// The stronger of two boundaries.
    #[must_use]
    pub fn strongest(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for IsolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Subprocess => write!(f, "subprocess"),
            Self::Container => write!(f, "container"),
        }
    }
}

impl FromStr for IsolationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "subprocess" => Ok(Self::Subprocess),
            "container" => Ok(Self::Container),
            other => Err(CoreError::UnknownVariant {
                kind: "isolation type",
                value: other.to_string(),
            }),
        }
    }
}

/// Deployment mode, ordered strictest to loosest.
///
/// Selects default approval and checkpoint thresholds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Human approval for almost everything.
    Safe,
    /// Human approval for medium risk and above.
    #[default]
    Supervised,
    /// Human approval only for critical actions.
    Autonomous,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Supervised => write!(f, "supervised"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(Self::Safe),
            "supervised" => Ok(Self::Supervised),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(CoreError::UnknownVariant {
                kind: "deployment mode",
                value: other.to_string(),
            }),
        }
    }
}
