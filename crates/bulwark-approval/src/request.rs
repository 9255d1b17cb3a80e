//! Approval request types.

use std::fmt;

use bulwark_core::{ActionId, PrincipalId, RequestId, RiskLevel, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replacement for sensitive values in state snapshots.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments whose values are never shown to an approver.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "token", "secret", "key", "api_key"];

/// Where an approval request is in its lifecycle.
///
/// `Pending` is the only non-terminal state; every other state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// A human approved.
    Approved,
    /// A human denied, or the request was cancelled.
    Denied,
    /// The approval window elapsed.
    Expired,
}

impl ApprovalStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Who resolved a request, when and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The approver, or `system` for timeouts and cancellation.
    pub by: String,
    /// Reason given, if any.
    pub reason: Option<String>,
    /// Clock service time of resolution.
    pub at: Timestamp,
}

/// What the guard submits to the gate for one action.
#[derive(Debug, Clone)]
pub struct ApprovalSubmission {
    /// The action awaiting a decision.
    pub action_id: ActionId,
    /// Who the action runs for.
    pub principal: PrincipalId,
    /// Declared risk.
    pub risk_level: RiskLevel,
    /// One-line summary for the approver.
    pub summary: String,
    /// State shown to the approver; sanitized before storage.
    pub state: Value,
}

/// A request for a human decision on one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub id: RequestId,
    /// The action awaiting a decision.
    pub action_id: ActionId,
    /// Who the action runs for.
    pub principal: PrincipalId,
    /// Declared risk.
    pub risk_level: RiskLevel,
    /// One-line summary for the approver.
    pub summary: String,
    /// Sanitized state shown to the approver.
    pub state_snapshot: Value,
    /// When the request was created.
    pub requested_at: Timestamp,
    /// When the request expires if unresolved.
    pub timeout_at: Timestamp,
    /// Current status.
    pub status: ApprovalStatus,
    /// Set once the request reaches a terminal status.
    pub resolution: Option<Resolution>,
}

impl fmt::Display for ApprovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] risk {} for {}: {}",
            self.status, self.risk_level, self.principal, self.summary
        )
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Replace values under sensitive keys with [`REDACTED`], recursively.
#[must_use]
pub fn sanitize_state(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_state(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_state).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_redacts_nested_secrets() {
        let state = json!({
            "path": "/workspace/report.md",
            "API_KEY": "sk-123",
            "auth": { "password": "hunter2", "user": "ada" },
            "sessions": [{ "refresh_token": "abc", "id": 7 }],
            "signing_key_path": "/etc/key",
        });
        let clean = sanitize_state(&state);
        assert_eq!(clean["path"], "/workspace/report.md");
        assert_eq!(clean["API_KEY"], REDACTED);
        assert_eq!(clean["auth"]["password"], REDACTED);
        assert_eq!(clean["auth"]["user"], "ada");
        assert_eq!(clean["sessions"][0]["refresh_token"], REDACTED);
        assert_eq!(clean["sessions"][0]["id"], 7);
        assert_eq!(clean["signing_key_path"], REDACTED);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        for s in [
            ApprovalStatus::Approved,
            ApprovalStatus::Denied,
            ApprovalStatus::Expired,
        ] {
            assert!(s.is_terminal());
        }
    }
}
