//! Effective isolation selection.

use bulwark_core::{IsolationType, RiskLevel, TrustLevel};
use serde::{Deserialize, Serialize};

/// Chooses the effective boundary for an action.
///
/// The result is the strongest of the declared type, the floor implied by
/// the trust level, and (when configured) `container` for risk at or above
/// `container_at_risk`. A declaration can only strengthen the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationPolicy {
    /// Risk at or above which every action runs in a container.
    pub container_at_risk: Option<RiskLevel>,
}

impl IsolationPolicy {
    /// Force containers from `risk` upward.
    #[must_use]
    pub fn with_container_at_risk(mut self, risk: RiskLevel) -> Self {
        self.container_at_risk = Some(risk);
        self
    }

    /// The effective boundary.
    #[must_use]
    pub fn select(
        &self,
        trust: TrustLevel,
        risk: RiskLevel,
        declared: IsolationType,
    ) -> IsolationType {
        let floor = declared.strongest(trust.isolation_floor());
        if self.container_at_risk.is_some_and(|threshold| risk >= threshold) {
            IsolationType::Container
        } else {
            floor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRUST: [TrustLevel; 4] = [
        TrustLevel::Unverified,
        TrustLevel::Verified,
        TrustLevel::Trusted,
        TrustLevel::Builtin,
    ];
    const ALL_ISOLATION: [IsolationType; 3] = [
        IsolationType::Inline,
        IsolationType::Subprocess,
        IsolationType::Container,
    ];

    #[test]
    fn test_unverified_inline_becomes_container() {
        let policy = IsolationPolicy::default();
        assert_eq!(
            policy.select(TrustLevel::Unverified, RiskLevel::MIN, IsolationType::Inline),
            IsolationType::Container
        );
    }

    #[test]
    fn test_floors() {
        let policy = IsolationPolicy::default();
        let low = RiskLevel::MIN;
        assert_eq!(
            policy.select(TrustLevel::Verified, low, IsolationType::Inline),
            IsolationType::Subprocess
        );
        assert_eq!(
            policy.select(TrustLevel::Trusted, low, IsolationType::Inline),
            IsolationType::Subprocess
        );
        assert_eq!(
            policy.select(TrustLevel::Builtin, low, IsolationType::Inline),
            IsolationType::Inline
        );
        assert_eq!(
            policy.select(TrustLevel::Builtin, low, IsolationType::Container),
            IsolationType::Container
        );
    }

    #[test]
    fn test_never_weaker_than_declared_or_floor() {
        let policy = IsolationPolicy::default();
        for trust in ALL_TRUST {
            for declared in ALL_ISOLATION {
                for risk in 1..=5 {
                    let risk = RiskLevel::new(risk).unwrap();
                    let effective = policy.select(trust, risk, declared);
                    assert!(effective >= declared);
                    assert!(effective >= trust.isolation_floor());
                }
            }
        }
    }

    #[test]
    fn test_container_at_risk() {
        let policy = IsolationPolicy::default().with_container_at_risk(RiskLevel::new(4).unwrap());
        assert_eq!(
            policy.select(TrustLevel::Builtin, RiskLevel::new(3).unwrap(), IsolationType::Inline),
            IsolationType::Inline
        );
        assert_eq!(
            policy.select(TrustLevel::Builtin, RiskLevel::new(4).unwrap(), IsolationType::Inline),
            IsolationType::Container
        );
    }
}
