//! Per-action tracing context.

use std::collections::BTreeMap;
use std::time::Duration;

use bulwark_core::{ActionId, CorrelationId, PrincipalId, RiskLevel, Timestamp};
use serde::{Deserialize, Serialize};

/// Context carried through one guarded execution.
///
/// Every log line emitted inside [`ActionContext::span`] carries the action
/// id, correlation id and principal, so logs can be joined against the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    /// The action.
    pub action_id: ActionId,
    /// Shared with every audit entry for the action.
    pub correlation_id: CorrelationId,
    /// Who submitted it.
    pub principal: PrincipalId,
    /// Manifest name, once known.
    pub action_name: Option<String>,
    /// Declared risk, once validated.
    pub risk_level: Option<RiskLevel>,
    /// When the guard accepted the request.
    pub started_at: Timestamp,
    /// Free-form labels.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ActionContext {
    /// Fresh context with new ids.
    #[must_use]
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            action_id: ActionId::new(),
            correlation_id: CorrelationId::new(),
            principal,
            action_name: None,
            risk_level: None,
            started_at: Timestamp::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Use existing ids.
    #[must_use]
    pub fn with_ids(mut self, action_id: ActionId, correlation_id: CorrelationId) -> Self {
        self.action_id = action_id;
        self.correlation_id = correlation_id;
        self
    }

    /// Record the manifest name.
    #[must_use]
    pub fn with_action_name(mut self, name: impl Into<String>) -> Self {
        self.action_name = Some(name.into());
        self
    }

    /// Record the declared risk.
    #[must_use]
    pub fn with_risk_level(mut self, risk: RiskLevel) -> Self {
        self.risk_level = Some(risk);
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Wall-clock time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Timestamp::now().duration_since(self.started_at)
    }

    /// [`elapsed`](Self::elapsed) in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Span for the guarded execution. Attach with
    /// [`tracing::Instrument::instrument`] across await points.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "action",
            action_id = %self.action_id,
            correlation_id = %self.correlation_id,
            principal = %self.principal,
            name = self.action_name.as_deref(),
            risk = self.risk_level.map(RiskLevel::get),
        )
    }

    /// Short id for human-facing output.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.action_id.0.simple().to_string().chars().take(8).collect()
    }
}
