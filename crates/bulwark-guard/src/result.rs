//! The result envelope returned for every submitted action.

use bulwark_core::{ActionId, CheckpointId, CorrelationId, IsolationType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, GuardError};

/// Measurements for one guarded execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetrics {
    /// Boundary that hosted the action, if it got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<IsolationType>,
    /// Spawn attempts made.
    pub spawn_attempts: u32,
    /// Time suspended on approval.
    pub approval_wait_ms: u64,
    /// Time inside the boundary.
    pub execution_ms: u64,
    /// Time from submission to result.
    pub total_ms: u64,
    /// Pre-action snapshot, if one was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
    /// Whether state was restored from the checkpoint.
    pub rolled_back: bool,
    /// Audit entries written for the action.
    pub audit_entries: u32,
}

/// Caller-facing description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Kind tag.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub detail: String,
    /// Whether resubmitting could succeed.
    pub retryable: bool,
}

impl From<&GuardError> for ErrorReport {
    fn from(err: &GuardError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// `{success, result | error, metrics}` for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The action.
    pub action_id: ActionId,
    /// Correlation id shared with its audit entries.
    pub correlation_id: CorrelationId,
    /// Whether the action ran to completion.
    pub success: bool,
    /// The action's output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// Measurements.
    pub metrics: ActionMetrics,
}

impl ActionResult {
    pub(crate) fn from_outcome(
        action_id: ActionId,
        correlation_id: CorrelationId,
        outcome: &Result<Value, GuardError>,
        metrics: ActionMetrics,
    ) -> Self {
        match outcome {
            Ok(value) => Self {
                action_id,
                correlation_id,
                success: true,
                result: Some(value.clone()),
                error: None,
                metrics,
            },
            Err(err) => Self {
                action_id,
                correlation_id,
                success: false,
                result: None,
                error: Some(ErrorReport::from(err)),
                metrics,
            },
        }
    }

    /// Kind of the failure, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let result = ActionResult::from_outcome(
            ActionId::new(),
            CorrelationId::new(),
            &Ok(json!({ "rows": 3 })),
            ActionMetrics::default(),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["result"], json!({ "rows": 3 }));
        assert!(value.get("error").is_none());
        assert!(value["metrics"].get("checkpoint_id").is_none());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let err = GuardError::CapabilityDenied {
            missing: vec!["net:connect:/example.com".into()],
        };
        let result = ActionResult::from_outcome(
            ActionId::new(),
            CorrelationId::new(),
            &Err(err),
            ActionMetrics::default(),
        );
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Capability));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["error"]["kind"], json!("capability"));
        assert_eq!(value["error"]["retryable"], json!(false));
        assert!(value.get("result").is_none());
    }
}
