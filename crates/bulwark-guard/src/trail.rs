//! Per-action audit writer.

use std::sync::Arc;

use bulwark_audit::{Actor, AuditEntry, AuditEvent, AuditLog, AuditRecord};
use bulwark_core::{ActionId, CorrelationId};

use crate::error::GuardResult;

/// Appends the entries of one action, stamped with its ids.
pub(crate) struct Trail {
    audit: Arc<AuditLog>,
    actor: Actor,
    action_id: ActionId,
    correlation_id: CorrelationId,
    written: u32,
}

impl Trail {
    pub(crate) fn new(
        audit: Arc<AuditLog>,
        actor: Actor,
        action_id: ActionId,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            audit,
            actor,
            action_id,
            correlation_id,
            written: 0,
        }
    }

    fn base(&self, event: AuditEvent) -> AuditRecord {
        AuditRecord::new(self.actor.clone(), event)
            .action(self.action_id)
            .correlation(self.correlation_id)
    }

    async fn append(&mut self, record: AuditRecord) -> GuardResult<AuditEntry> {
        let entry = self.audit.append(record).await?;
        self.written = self.written.saturating_add(1);
        Ok(entry)
    }

    pub(crate) async fn record(&mut self, event: AuditEvent) -> GuardResult<AuditEntry> {
        let record = self.base(event);
        self.append(record).await
    }

    pub(crate) async fn record_failure(
        &mut self,
        event: AuditEvent,
        error: impl Into<String>,
    ) -> GuardResult<AuditEntry> {
        let record = self.base(event).failed(error);
        self.append(record).await
    }

    pub(crate) fn written(&self) -> u32 {
        self.written
    }
}
