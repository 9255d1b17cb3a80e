//! Action submissions and the context handed to running actions.

use bulwark_capabilities::Capability;
use bulwark_core::{
    ActionId, ActionManifest, CheckpointId, CorrelationId, IsolationType, PrincipalId,
    ResourceLimits,
};
use bulwark_isolation::ActionBody;
use serde_json::Value;

/// One action submitted to the guard.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Who the action runs for.
    pub principal: PrincipalId,
    /// Declared requirements, validated before anything else happens.
    pub manifest: ActionManifest,
    /// What to run.
    pub body: ActionBody,
    /// JSON input handed to the action.
    pub input: Value,
    /// One-line summary shown to approvers. Defaults to the manifest name.
    pub summary: Option<String>,
}

impl ActionRequest {
    /// A request with `null` input.
    #[must_use]
    pub fn new(principal: impl Into<PrincipalId>, manifest: ActionManifest, body: ActionBody) -> Self {
        Self {
            principal: principal.into(),
            manifest,
            body,
            input: Value::Null,
            summary: None,
        }
    }

    /// Set the input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the approver-facing summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub(crate) fn summary(&self) -> String {
        self.summary
            .clone()
            .unwrap_or_else(|| format!("run {}", self.manifest.name))
    }
}

/// What an admitted action is told about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// The action.
    pub action_id: ActionId,
    /// Shared with every audit entry of the action.
    pub correlation_id: CorrelationId,
    /// Who the action runs for.
    pub principal: PrincipalId,
    /// Capabilities verified at admission.
    pub granted: Vec<Capability>,
    /// Limits the boundary enforces.
    pub limits: ResourceLimits,
    /// Pre-action snapshot, if one was taken.
    pub checkpoint_id: Option<CheckpointId>,
    /// Effective boundary.
    pub boundary: IsolationType,
}

impl ExecutionContext {
    /// Environment passed to command actions.
    #[must_use]
    pub fn to_env_vars(&self) -> Vec<(String, String)> {
        let capabilities = self
            .granted
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut vars = vec![
            ("BULWARK_ACTION_ID".to_string(), self.action_id.0.to_string()),
            (
                "BULWARK_CORRELATION_ID".to_string(),
                self.correlation_id.0.to_string(),
            ),
            ("BULWARK_PRINCIPAL".to_string(), self.principal.to_string()),
            ("BULWARK_CAPABILITIES".to_string(), capabilities),
            (
                "BULWARK_TIMEOUT_SECS".to_string(),
                self.limits.timeout_secs.to_string(),
            ),
        ];
        if let Some(id) = self.checkpoint_id {
            vars.push(("BULWARK_CHECKPOINT_ID".to_string(), id.0.to_string()));
        }
        vars
    }

    /// `body` with the context applied. Command actions receive it as
    /// environment variables, overriding any of the same name.
    pub(crate) fn apply(&self, body: &ActionBody) -> ActionBody {
        match body {
            ActionBody::Command(spec) => {
                let mut spec = spec.clone();
                spec.env.extend(self.to_env_vars());
                ActionBody::Command(spec)
            },
            inline @ ActionBody::Inline(_) => inline.clone(),
        }
    }
}
