//! Configuration types.
//!
//! This crate depends on no other bulwark crate. Domain types are mirrored
//! here and converted where the configuration is consumed. Every struct
//! implements [`Default`] to match `defaults.toml`, so a bare `[section]`
//! header produces a working configuration.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment mode preset.
    pub deployment: DeploymentSection,
    /// Approval gate settings.
    pub approval: ApprovalSection,
    /// Checkpoint settings.
    pub checkpoint: CheckpointSection,
    /// Isolation boundary settings.
    pub isolation: IsolationSection,
    /// Manifest ceilings.
    pub limits: LimitsSection,
    /// Persistent storage.
    pub storage: StorageSection,
    /// Clock service.
    pub clock: ClockSection,
    /// Logging.
    pub logging: LoggingSection,
}

/// How much the deployment trusts its agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Approve early, snapshot early.
    Safe,
    /// The default.
    #[default]
    Supervised,
    /// Approve only the riskiest actions.
    Autonomous,
}

impl Mode {
    /// Names from strictest to most permissive.
    pub const ORDERED: [&'static str; 3] = ["safe", "supervised", "autonomous"];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Supervised => "supervised",
            Self::Autonomous => "autonomous",
        }
    }

    /// Values used when the corresponding field is unset.
    #[must_use]
    pub fn preset(self) -> ModePreset {
        match self {
            Self::Safe => ModePreset {
                approval_threshold: 2,
                checkpoint_floor: 2,
                approval_timeout_secs: 300,
            },
            Self::Supervised => ModePreset {
                approval_threshold: 3,
                checkpoint_floor: 4,
                approval_timeout_secs: 300,
            },
            Self::Autonomous => ModePreset {
                approval_threshold: 5,
                checkpoint_floor: 4,
                approval_timeout_secs: 120,
            },
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Self::Safe),
            "supervised" => Some(Self::Supervised),
            "autonomous" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk policy values implied by a [`Mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePreset {
    /// Lowest risk level routed to a human.
    pub approval_threshold: u8,
    /// Lowest risk level that gets a checkpoint.
    pub checkpoint_floor: u8,
    /// Approval window.
    pub approval_timeout_secs: u64,
}

/// `[deployment]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSection {
    /// Preset for unset risk policy values.
    pub mode: Mode,
}

/// `[approval]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Overrides the mode's approval threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u8>,
    /// Overrides the mode's approval window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// `[checkpoint]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    /// Overrides the mode's checkpoint floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor: Option<u8>,
    /// How long to wait for a contended scope.
    pub lock_timeout_secs: u64,
    /// Largest filesystem snapshot.
    pub max_snapshot_bytes: u64,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            floor: None,
            lock_timeout_secs: 30,
            max_snapshot_bytes: 67_108_864,
        }
    }
}

/// `[isolation]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSection {
    /// Container runtime binary. Detected on PATH when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<PathBuf>,
    /// Image for command actions that name none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Risk level at or above which every action runs in a container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_at_risk: Option<u8>,
    /// Ceiling on a single spawn attempt.
    pub spawn_timeout_secs: u64,
    /// Spawn attempts before giving up, first included.
    pub spawn_attempts: u32,
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            container_runtime: None,
            container_image: None,
            container_at_risk: None,
            spawn_timeout_secs: 30,
            spawn_attempts: 3,
        }
    }
}

/// `[limits]`: the largest resource limits a manifest may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Wall-clock ceiling.
    pub max_timeout_secs: u64,
    /// Memory ceiling.
    pub max_memory_mb: u64,
    /// CPU ceiling.
    pub max_cpu_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_timeout_secs: 3600,
            max_memory_mb: 4096,
            max_cpu_secs: 300,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Where grants, audit entries, checkpoints and keys live. Defaults to
    /// `~/.bulwark/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// `[clock]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    /// This node's id.
    pub node_id: String,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Level filter.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Effective approval threshold.
    #[must_use]
    pub fn approval_threshold(&self) -> u8 {
        self.approval
            .threshold
            .unwrap_or(self.deployment.mode.preset().approval_threshold)
    }

    /// Effective checkpoint floor.
    #[must_use]
    pub fn checkpoint_floor(&self) -> u8 {
        self.checkpoint
            .floor
            .unwrap_or(self.deployment.mode.preset().checkpoint_floor)
    }

    /// Effective approval window in seconds.
    #[must_use]
    pub fn approval_timeout_secs(&self) -> u64 {
        self.approval
            .timeout_secs
            .unwrap_or(self.deployment.mode.preset().approval_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_follow_mode() {
        let mut config = Config::default();
        assert_eq!(config.approval_threshold(), 3);
        assert_eq!(config.checkpoint_floor(), 4);

        config.deployment.mode = Mode::Safe;
        assert_eq!(config.approval_threshold(), 2);
        assert_eq!(config.checkpoint_floor(), 2);

        config.deployment.mode = Mode::Autonomous;
        assert_eq!(config.approval_threshold(), 5);
        assert_eq!(config.approval_timeout_secs(), 120);
    }

    #[test]
    fn test_explicit_values_override_preset() {
        let mut config = Config::default();
        config.deployment.mode = Mode::Autonomous;
        config.approval.threshold = Some(1);
        config.checkpoint.floor = Some(1);
        assert_eq!(config.approval_threshold(), 1);
        assert_eq!(config.checkpoint_floor(), 1);
    }

    #[test]
    fn test_mode_order_matches_strictness() {
        assert!(Mode::Safe < Mode::Supervised);
        assert!(Mode::Supervised < Mode::Autonomous);
        for (i, name) in Mode::ORDERED.iter().enumerate() {
            let mode = Mode::parse(name).unwrap();
            assert_eq!(mode.as_str(), *name);
            assert_eq!(Mode::ORDERED.iter().position(|m| m == name), Some(i));
        }
    }

    #[test]
    fn test_bare_sections_use_defaults() {
        let config: Config = toml::from_str("[checkpoint]\n[isolation]\n").unwrap();
        assert_eq!(config, Config::default());
    }
}
