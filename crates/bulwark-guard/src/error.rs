//! The caller-facing error taxonomy.

use std::fmt;

use bulwark_approval::{ApprovalError, ApprovalStatus};
use bulwark_audit::AuditError;
use bulwark_capabilities::CapabilityError;
use bulwark_checkpoint::CheckpointError;
use bulwark_core::{CoreError, RequestId};
use bulwark_isolation::{ExecutionFault, IsolationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag carried by every error surfaced to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structurally invalid manifest. Caller must fix it.
    InvalidManifest,
    /// A required capability is not granted.
    Capability,
    /// Approval was denied, expired or could not be obtained.
    Approval,
    /// A required checkpoint could not be taken or settled.
    Checkpoint,
    /// The boundary could not be spawned.
    Isolation,
    /// The action failed, timed out or breached a limit.
    ExecutionFault,
    /// A security decision could not be recorded.
    AuditWrite,
    /// The caller cancelled, or the guard is shutting down.
    Cancelled,
}

impl ErrorKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidManifest => "invalid_manifest",
            Self::Capability => "capability",
            Self::Approval => "approval",
            Self::Checkpoint => "checkpoint",
            Self::Isolation => "isolation",
            Self::ExecutionFault => "execution_fault",
            Self::AuditWrite => "audit_write",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn reason_suffix(reason: Option<&String>) -> String {
    reason.map(|r| format!(": {r}")).unwrap_or_default()
}

/// Errors returned by the execution guard.
///
/// None of these is ever downgraded to success.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The manifest failed structural validation.
    #[error("invalid manifest field {field}: {reason}")]
    InvalidManifest {
        /// The offending field.
        field: String,
        /// Why.
        reason: String,
    },

    /// The principal lacks at least one required capability.
    #[error("missing capabilities: {}", .missing.join(", "))]
    CapabilityDenied {
        /// Required patterns no live grant covers.
        missing: Vec<String>,
    },

    /// A capability administration call failed.
    #[error("capability administration failed: {0}")]
    Capability(#[from] CapabilityError),

    /// The approval request was denied or expired.
    #[error("approval {status}{}", reason_suffix(.reason.as_ref()))]
    ApprovalDenied {
        /// The request.
        request_id: RequestId,
        /// `denied` or `expired`.
        status: ApprovalStatus,
        /// Reason given by the approver, if any.
        reason: Option<String>,
    },

    /// The approval gate refused or lost the request.
    #[error("approval gate error: {0}")]
    Approval(#[from] ApprovalError),

    /// Checkpoint creation or settlement failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The isolation boundary could not be created.
    #[error("isolation error: {0}")]
    Isolation(IsolationError),

    /// The action failed inside its boundary.
    #[error(transparent)]
    Fault(#[from] ExecutionFault),

    /// An audit entry could not be written.
    #[error("audit write failed: {0}")]
    AuditWrite(#[from] AuditError),

    /// Cancelled by the caller or by shutdown.
    #[error("cancelled during {stage}")]
    Cancelled {
        /// Protocol stage that observed the cancellation.
        stage: String,
    },
}

impl GuardError {
    pub(crate) fn cancelled(stage: &str) -> Self {
        Self::Cancelled {
            stage: stage.to_string(),
        }
    }

    /// The error's kind tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidManifest { .. } => ErrorKind::InvalidManifest,
            Self::CapabilityDenied { .. } | Self::Capability(_) => ErrorKind::Capability,
            Self::ApprovalDenied { .. } | Self::Approval(_) => ErrorKind::Approval,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::Isolation(_) => ErrorKind::Isolation,
            Self::Fault(_) => ErrorKind::ExecutionFault,
            Self::AuditWrite(_) => ErrorKind::AuditWrite,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether resubmitting the same request could succeed without the
    /// caller changing anything else.
    ///
    /// - a denied or expired approval can be retried via a fresh request
    /// - a contended checkpoint scope may free up
    /// - a boundary spawn failure may be transient
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApprovalDenied { .. } => true,
            Self::Checkpoint(CheckpointError::LockTimeout { .. }) => true,
            Self::Isolation(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Short failure tag for `execution_failed` audit entries.
    pub(crate) fn failure_tag(&self) -> &'static str {
        match self {
            Self::Fault(fault) => fault.kind(),
            other => other.kind().as_str(),
        }
    }
}

impl From<CoreError> for GuardError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidManifest { field, reason } => Self::InvalidManifest { field, reason },
            other => Self::InvalidManifest {
                field: "manifest".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<IsolationError> for GuardError {
    fn from(err: IsolationError) -> Self {
        match err {
            IsolationError::Fault(fault) => Self::Fault(fault),
            IsolationError::Cancelled => Self::cancelled("execution"),
            other => Self::Isolation(other),
        }
    }
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;
