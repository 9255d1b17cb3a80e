//! Grants and revocation tombstones.

use bulwark_core::{GrantId, PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::pattern::Capability;

/// An issued binding of a capability to a principal.
///
/// Grants are never mutated after issue; revocation records a
/// [`Tombstone`] and drops the grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Unique grant identifier.
    pub id: GrantId,
    /// Who holds the capability.
    pub principal: PrincipalId,
    /// The granted pattern.
    pub capability: Capability,
    /// When the grant was issued (clock service time).
    pub issued_at: Timestamp,
    /// When the grant stops counting, if ever.
    pub expires_at: Option<Timestamp>,
    /// Who issued it.
    pub issuer: String,
}

impl Grant {
    /// Whether the grant has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Why a grant stopped existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// Explicitly revoked by an administrator.
    Revoked,
    /// Removed by an expiry sweep or replaced after expiring.
    Expired,
}

/// Append-only record that a grant was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// The removed grant.
    pub grant_id: GrantId,
    /// Its former holder.
    pub principal: PrincipalId,
    /// Its pattern.
    pub capability: Capability,
    /// When it was removed.
    pub revoked_at: Timestamp,
    /// Why it was removed.
    pub reason: RevocationReason,
}

impl Tombstone {
    pub(crate) fn for_grant(grant: &Grant, at: Timestamp, reason: RevocationReason) -> Self {
        Self {
            grant_id: grant.id,
            principal: grant.principal.clone(),
            capability: grant.capability.clone(),
            revoked_at: at,
            reason,
        }
    }
}

/// Outcome of checking a set of required capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityCheck {
    /// Required capabilities covered by a live grant.
    pub granted: Vec<Capability>,
    /// Required capabilities no live grant covers.
    pub missing: Vec<Capability>,
}

impl CapabilityCheck {
    /// Whether every required capability is covered.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.missing.is_empty()
    }
}
