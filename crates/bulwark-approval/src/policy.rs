//! Risk policy: which risk levels need a human and which need a snapshot.

use std::time::Duration;

use bulwark_core::{DeploymentMode, RiskLevel};
use serde::{Deserialize, Serialize};

use crate::error::{ApprovalError, ApprovalResult};

/// Maps risk levels to approval and checkpoint requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Risk at or above which a human must approve.
    pub approval_threshold: RiskLevel,
    /// Risk at or above which a checkpoint is taken before execution.
    pub checkpoint_floor: RiskLevel,
    /// How long a pending request waits before expiring.
    #[serde(with = "duration_secs")]
    pub approval_timeout: Duration,
}

impl RiskPolicy {
    /// The preset for a deployment mode.
    ///
    /// | Mode | Approval threshold | Checkpoint floor | Timeout |
    /// |------|--------------------|------------------|---------|
    /// | safe | 2 | 2 | 300 s |
    /// | supervised | 3 | 4 | 300 s |
    /// | autonomous | 5 | 4 | 120 s |
    #[must_use]
    pub fn for_mode(mode: DeploymentMode) -> Self {
        let (approval, checkpoint, timeout_secs) = match mode {
            DeploymentMode::Safe => (2, 2, 300),
            DeploymentMode::Supervised => (3, 4, 300),
            DeploymentMode::Autonomous => (5, 4, 120),
        };
        Self {
            approval_threshold: RiskLevel::new(approval).unwrap_or(RiskLevel::MIN),
            checkpoint_floor: RiskLevel::new(checkpoint).unwrap_or(RiskLevel::MIN),
            approval_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Override the approval threshold.
    #[must_use]
    pub fn with_approval_threshold(mut self, threshold: RiskLevel) -> Self {
        self.approval_threshold = threshold;
        self
    }

    /// Override the checkpoint floor.
    #[must_use]
    pub fn with_checkpoint_floor(mut self, floor: RiskLevel) -> Self {
        self.checkpoint_floor = floor;
        self
    }

    /// Override the approval timeout.
    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Whether `risk` routes to a human.
    #[must_use]
    pub fn requires_approval(&self, risk: RiskLevel) -> bool {
        risk >= self.approval_threshold
    }

    /// Whether `risk` requires a checkpoint before execution.
    #[must_use]
    pub fn requires_checkpoint(&self, risk: RiskLevel) -> bool {
        risk >= self.checkpoint_floor
    }

    /// Check the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidPolicy`] for a zero approval timeout.
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.approval_timeout.is_zero() {
            return Err(ApprovalError::InvalidPolicy(
                "approval timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::for_mode(DeploymentMode::default())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
