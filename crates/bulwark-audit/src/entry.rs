//! Audit entry types and events.
//!
//! Every security-relevant decision is recorded as an audit entry. Entries
//! are chain-linked (each hashes its predecessor's hash into its own) and
//! signed by the runtime key.

use std::fmt;

use bulwark_core::{
    ActionId, CheckpointId, CorrelationId, GrantId, IsolationType, PrincipalId, RequestId,
    ResourceLimits, RiskLevel, Timestamp,
};
use bulwark_crypto::{ContentHash, FieldHasher, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Domain separator for entry hashes.
pub const ENTRY_HASH_DOMAIN: &str = "bulwark.audit.entry.v1";

/// Who caused an audited event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// The principal an action runs on behalf of.
    Principal(PrincipalId),
    /// A human or tool performing administration.
    Administrator(String),
    /// The gate itself (sweeps, shutdown).
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(p) => write!(f, "principal:{p}"),
            Self::Administrator(name) => write!(f, "admin:{name}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Events that can be audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A manifest failed structural validation.
    ManifestRejected {
        /// Manifest name as submitted.
        name: String,
        /// Validation failure.
        reason: String,
    },

    /// Every required capability is held.
    CapabilitiesVerified {
        /// The required capabilities.
        capabilities: Vec<String>,
    },

    /// At least one required capability is missing.
    CapabilityDenied {
        /// The missing capabilities.
        missing: Vec<String>,
    },

    /// A capability was granted.
    CapabilityGranted {
        /// Grant id.
        grant_id: GrantId,
        /// Holder.
        principal: PrincipalId,
        /// Pattern.
        capability: String,
        /// Expiry, if any.
        expires_at: Option<Timestamp>,
    },

    /// A capability was revoked.
    CapabilityRevoked {
        /// Grant id.
        grant_id: GrantId,
        /// Former holder.
        principal: PrincipalId,
        /// Pattern.
        capability: String,
    },

    /// An administrator listed live grants.
    CapabilitiesListed {
        /// Whose grants; `None` for every principal.
        principal: Option<PrincipalId>,
        /// Live grants returned.
        count: usize,
    },

    /// An expiry sweep removed grants.
    GrantsExpired {
        /// Removed grants.
        grant_ids: Vec<GrantId>,
    },

    /// A human decision was requested.
    ApprovalRequested {
        /// Request id.
        request_id: RequestId,
        /// Declared risk.
        risk_level: RiskLevel,
        /// When the request expires.
        timeout_at: Timestamp,
    },

    /// The action was approved.
    ApprovalGranted {
        /// Request id (absent for automatic approval).
        request_id: Option<RequestId>,
        /// Who approved.
        approver: String,
        /// Whether the risk was below the approval threshold.
        automatic: bool,
    },

    /// The action was denied, expired or cancelled while pending.
    ApprovalDenied {
        /// Request id.
        request_id: RequestId,
        /// Terminal status (`denied` or `expired`).
        status: String,
        /// Reason given, if any.
        reason: Option<String>,
    },

    /// A pre-action snapshot was taken.
    CheckpointCreated {
        /// Checkpoint id.
        checkpoint_id: CheckpointId,
        /// Scope entries covered.
        scope: Vec<String>,
        /// Snapshot integrity hash.
        integrity: ContentHash,
    },

    /// A required snapshot could not be taken.
    CheckpointFailed {
        /// Why.
        reason: String,
    },

    /// The snapshot was discarded after success.
    CheckpointCommitted {
        /// Checkpoint id.
        checkpoint_id: CheckpointId,
    },

    /// Execution began inside a boundary.
    ExecutionStarted {
        /// Effective isolation boundary.
        boundary: IsolationType,
        /// Enforced limits.
        limits: ResourceLimits,
    },

    /// Execution completed successfully.
    ExecutionSucceeded {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Hash of the serialized result, if any.
        result_hash: Option<ContentHash>,
    },

    /// Execution failed.
    ExecutionFailed {
        /// Failure kind tag.
        kind: String,
        /// Human-readable detail.
        detail: String,
        /// Wall-clock duration.
        duration_ms: u64,
    },

    /// The caller cancelled the action.
    ExecutionCancelled {
        /// Protocol stage at cancellation.
        stage: String,
    },

    /// State was restored from a checkpoint.
    RollbackExecuted {
        /// Checkpoint id.
        checkpoint_id: CheckpointId,
    },

    /// Restoring from a checkpoint failed.
    RollbackFailed {
        /// Checkpoint id.
        checkpoint_id: CheckpointId,
        /// Why.
        reason: String,
    },
}

impl AuditEvent {
    /// The snake-case event name, identical to the serialized `type` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManifestRejected { .. } => "manifest_rejected",
            Self::CapabilitiesVerified { .. } => "capabilities_verified",
            Self::CapabilityDenied { .. } => "capability_denied",
            Self::CapabilityGranted { .. } => "capability_granted",
            Self::CapabilityRevoked { .. } => "capability_revoked",
            Self::CapabilitiesListed { .. } => "capabilities_listed",
            Self::GrantsExpired { .. } => "grants_expired",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalGranted { .. } => "approval_granted",
            Self::ApprovalDenied { .. } => "approval_denied",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
            Self::CheckpointCommitted { .. } => "checkpoint_committed",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionSucceeded { .. } => "execution_succeeded",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::ExecutionCancelled { .. } => "execution_cancelled",
            Self::RollbackExecuted { .. } => "rollback_executed",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }

    /// A one-line human description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::ManifestRejected { name, reason } => {
                format!("Rejected manifest {name}: {reason}")
            },
            Self::CapabilitiesVerified { capabilities } => {
                format!("Verified {} capabilities", capabilities.len())
            },
            Self::CapabilityDenied { missing } => {
                format!("Missing capabilities: {}", missing.join(", "))
            },
            Self::CapabilityGranted {
                principal,
                capability,
                ..
            } => format!("Granted {capability} to {principal}"),
            Self::CapabilityRevoked {
                principal,
                capability,
                ..
            } => format!("Revoked {capability} from {principal}"),
            Self::CapabilitiesListed { principal, count } => match principal {
                Some(principal) => format!("Listed {count} grants of {principal}"),
                None => format!("Listed {count} grants"),
            },
            Self::GrantsExpired { grant_ids } => {
                format!("Swept {} expired grants", grant_ids.len())
            },
            Self::ApprovalRequested { risk_level, .. } => {
                format!("Approval requested at risk {risk_level}")
            },
            Self::ApprovalGranted {
                approver,
                automatic,
                ..
            } => {
                if *automatic {
                    "Auto-approved below threshold".to_string()
                } else {
                    format!("Approved by {approver}")
                }
            },
            Self::ApprovalDenied { status, reason, .. } => match reason {
                Some(reason) => format!("Approval {status}: {reason}"),
                None => format!("Approval {status}"),
            },
            Self::CheckpointCreated { checkpoint_id, .. } => {
                format!("Created checkpoint {checkpoint_id}")
            },
            Self::CheckpointFailed { reason } => format!("Checkpoint failed: {reason}"),
            Self::CheckpointCommitted { checkpoint_id } => {
                format!("Committed checkpoint {checkpoint_id}")
            },
            Self::ExecutionStarted { boundary, .. } => {
                format!("Execution started ({boundary})")
            },
            Self::ExecutionSucceeded { duration_ms, .. } => {
                format!("Execution succeeded in {duration_ms}ms")
            },
            Self::ExecutionFailed { kind, detail, .. } => {
                format!("Execution failed ({kind}): {detail}")
            },
            Self::ExecutionCancelled { stage } => format!("Cancelled during {stage}"),
            Self::RollbackExecuted { checkpoint_id } => {
                format!("Rolled back to {checkpoint_id}")
            },
            Self::RollbackFailed {
                checkpoint_id,
                reason,
            } => format!("Rollback to {checkpoint_id} failed: {reason}"),
        }
    }
}

/// Outcome of an audited decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The decision allowed progress, or the step succeeded.
    Success {
        /// Optional details.
        details: Option<String>,
    },
    /// The decision refused progress, or the step failed.
    Failure {
        /// Error message.
        error: String,
    },
}

impl AuditOutcome {
    /// Create a success outcome.
    #[must_use]
    pub fn success() -> Self {
        Self::Success { details: None }
    }

    /// Create a success outcome with details.
    #[must_use]
    pub fn success_with(details: impl Into<String>) -> Self {
        Self::Success {
            details: Some(details.into()),
        }
    }

    /// Create a failure outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Whether this is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// An entry before it is sequenced, hashed and signed.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Who caused the event.
    pub actor: Actor,
    /// The action it belongs to, if any.
    pub action_id: Option<ActionId>,
    /// Groups every entry of one guarded execution.
    pub correlation_id: Option<CorrelationId>,
    /// What happened.
    pub event: AuditEvent,
    /// How it ended.
    pub outcome: AuditOutcome,
}

impl AuditRecord {
    /// A successful record with no action context.
    #[must_use]
    pub fn new(actor: Actor, event: AuditEvent) -> Self {
        Self {
            actor,
            action_id: None,
            correlation_id: None,
            event,
            outcome: AuditOutcome::success(),
        }
    }

    /// Attach the action id.
    #[must_use]
    pub fn action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Attach the correlation id.
    #[must_use]
    pub fn correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Mark the record as a failure.
    #[must_use]
    pub fn failed(self, error: impl Into<String>) -> Self {
        self.outcome(AuditOutcome::failure(error))
    }
}

/// A single, sealed audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// Clock service time at append.
    pub timestamp: Timestamp,
    /// Who caused the event.
    pub actor: Actor,
    /// The action it belongs to, if any.
    pub action_id: Option<ActionId>,
    /// Groups every entry of one guarded execution.
    pub correlation_id: Option<CorrelationId>,
    /// What happened.
    pub event: AuditEvent,
    /// How it ended.
    pub outcome: AuditOutcome,
    /// Hash of the previous entry; zero for the genesis entry.
    pub prior_hash: ContentHash,
    /// Hash over every field above plus the signer.
    pub entry_hash: ContentHash,
    /// Runtime key that signed this entry.
    pub signer: PublicKey,
    /// Signature over `entry_hash`.
    pub signature: Signature,
}

impl AuditEntry {
    /// Sequence, hash and sign a record.
    #[must_use]
    pub(crate) fn seal(
        record: AuditRecord,
        sequence: u64,
        timestamp: Timestamp,
        prior_hash: ContentHash,
        key: &KeyPair,
    ) -> Self {
        let mut entry = Self {
            sequence,
            timestamp,
            actor: record.actor,
            action_id: record.action_id,
            correlation_id: record.correlation_id,
            event: record.event,
            outcome: record.outcome,
            prior_hash,
            entry_hash: ContentHash::zero(),
            signer: key.public_key(),
            signature: Signature::from_bytes([0u8; 64]),
        };
        entry.entry_hash = entry.compute_hash();
        entry.signature = key.sign(entry.entry_hash.as_bytes());
        entry
    }

    /// Recompute the entry hash from the entry's content.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        let actor = serde_json::to_vec(&self.actor).unwrap_or_default();
        let event = serde_json::to_vec(&self.event).unwrap_or_default();
        let outcome = serde_json::to_vec(&self.outcome).unwrap_or_default();
        FieldHasher::new(ENTRY_HASH_DOMAIN)
            .u64_field(self.sequence)
            .i64_field(self.timestamp.as_micros())
            .field(&actor)
            .opt_field(self.action_id.as_ref().map(|id| id.0.as_bytes().as_slice()))
            .opt_field(
                self.correlation_id
                    .as_ref()
                    .map(|id| id.0.as_bytes().as_slice()),
            )
            .field(&event)
            .field(&outcome)
            .field(self.signer.as_bytes())
            .field(self.prior_hash.as_bytes())
            .finish()
    }

    /// Whether the stored hash matches the content.
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        self.compute_hash() == self.entry_hash
    }

    /// Verify the signature over the stored hash.
    ///
    /// # Errors
    ///
    /// Returns the underlying crypto error if verification fails.
    pub fn verify_signature(&self) -> bulwark_crypto::CryptoResult<()> {
        self.signer
            .verify(self.entry_hash.as_bytes(), &self.signature)
    }

    /// Check if this entry directly follows `previous`.
    #[must_use]
    pub fn follows(&self, previous: &AuditEntry) -> bool {
        self.sequence == previous.sequence.saturating_add(1)
            && self.prior_hash == previous.entry_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(sequence: u64, prior: ContentHash, key: &KeyPair) -> AuditEntry {
        AuditEntry::seal(
            AuditRecord::new(
                Actor::System,
                AuditEvent::GrantsExpired { grant_ids: vec![] },
            ),
            sequence,
            Timestamp::from_micros(1_000),
            prior,
            key,
        )
    }

    #[test]
    fn test_sealed_entry_verifies() {
        let key = KeyPair::generate();
        let entry = sealed(1, ContentHash::zero(), &key);
        assert!(entry.hash_is_valid());
        assert!(entry.verify_signature().is_ok());
    }

    #[test]
    fn test_any_field_change_breaks_hash() {
        let key = KeyPair::generate();
        let entry = sealed(1, ContentHash::zero(), &key);

        let mut tampered = entry.clone();
        tampered.actor = Actor::Administrator("mallory".into());
        assert!(!tampered.hash_is_valid());

        let mut tampered = entry.clone();
        tampered.outcome = AuditOutcome::failure("x");
        assert!(!tampered.hash_is_valid());

        let mut tampered = entry;
        tampered.timestamp = Timestamp::from_micros(2_000);
        assert!(!tampered.hash_is_valid());
    }

    #[test]
    fn test_follows() {
        let key = KeyPair::generate();
        let first = sealed(1, ContentHash::zero(), &key);
        let second = sealed(2, first.entry_hash, &key);
        assert!(second.follows(&first));
        assert!(!first.follows(&second));
    }

    #[test]
    fn test_event_name_matches_serde_tag() {
        let event = AuditEvent::CapabilityDenied {
            missing: vec!["fs:write:/x".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
