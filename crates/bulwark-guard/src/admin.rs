//! Audited capability administration.

use std::sync::Arc;
use std::time::Duration;

use bulwark_audit::{Actor, AuditEvent, AuditLog, AuditRecord};
use bulwark_capabilities::{Capability, CapabilityRegistry, Grant, Issued, Tombstone};
use bulwark_core::{GrantId, PrincipalId};
use tracing::{error, info};

use crate::error::GuardResult;

/// Grant, revoke, list and sweep, each producing exactly one audit entry.
///
/// A mutation is undone when its audit entry cannot be written, so no
/// grant or revocation is in effect without a record of it.
#[derive(Debug, Clone)]
pub struct CapabilityAdmin {
    registry: Arc<CapabilityRegistry>,
    audit: Arc<AuditLog>,
}

impl CapabilityAdmin {
    /// Administer `registry`, recording into `audit`.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, audit: Arc<AuditLog>) -> Self {
        Self { registry, audit }
    }

    /// Grant `capability` to `principal`.
    ///
    /// # Errors
    ///
    /// Returns a capability error if the grant is refused, or an audit
    /// error if it could not be recorded. A new grant is withdrawn in the
    /// latter case.
    pub async fn grant(
        &self,
        principal: &PrincipalId,
        capability: Capability,
        ttl: Option<Duration>,
        issuer: &str,
    ) -> GuardResult<Grant> {
        let Issued { grant, created } = self
            .registry
            .issue(principal, capability, ttl, issuer)
            .await?;
        let recorded = self
            .audit
            .append(AuditRecord::new(
                Actor::Administrator(issuer.to_string()),
                AuditEvent::CapabilityGranted {
                    grant_id: grant.id,
                    principal: grant.principal.clone(),
                    capability: grant.capability.to_string(),
                    expires_at: grant.expires_at,
                },
            ))
            .await;
        if let Err(err) = recorded {
            if created && let Err(e) = self.registry.discard(grant.id).await {
                error!(grant_id = %grant.id, error = %e, "unrecorded grant could not be withdrawn");
            }
            return Err(err.into());
        }
        info!(grant_id = %grant.id, principal = %principal, issuer, "capability granted");
        Ok(grant)
    }

    /// Revoke a grant.
    ///
    /// # Errors
    ///
    /// Returns a capability error for an unknown or already revoked grant,
    /// or an audit error, in which case the grant is reinstated.
    pub async fn revoke(&self, grant_id: GrantId, by: &str) -> GuardResult<Tombstone> {
        let revoked = self.registry.get(grant_id);
        let tombstone = self.registry.revoke(grant_id).await?;
        let recorded = self
            .audit
            .append(AuditRecord::new(
                Actor::Administrator(by.to_string()),
                AuditEvent::CapabilityRevoked {
                    grant_id,
                    principal: tombstone.principal.clone(),
                    capability: tombstone.capability.to_string(),
                },
            ))
            .await;
        if let Err(err) = recorded {
            if let Some(grant) = revoked
                && let Err(e) = self.registry.reinstate(vec![grant]).await
            {
                error!(grant_id = %grant_id, error = %e, "unrecorded revocation could not be undone");
            }
            return Err(err.into());
        }
        Ok(tombstone)
    }

    /// Tombstone expired grants. Audited only when something expired.
    ///
    /// An unrecorded sweep is not undone: the swept grants had already
    /// lapsed and authorized nothing.
    ///
    /// # Errors
    ///
    /// Returns a capability error if persisting fails, or an audit error.
    pub async fn sweep_expired(&self) -> GuardResult<Vec<Tombstone>> {
        let swept = self.registry.sweep_expired().await?;
        if !swept.is_empty() {
            self.audit
                .append(AuditRecord::new(
                    Actor::System,
                    AuditEvent::GrantsExpired {
                        grant_ids: swept.iter().map(|t| t.grant_id).collect(),
                    },
                ))
                .await?;
        }
        Ok(swept)
    }

    /// Live grants of `principal`, or of every principal when `None`.
    ///
    /// # Errors
    ///
    /// Returns an audit error if the listing could not be recorded; the
    /// grants are withheld then.
    pub async fn list(&self, principal: Option<&PrincipalId>, by: &str) -> GuardResult<Vec<Grant>> {
        let principals = match principal {
            Some(p) => vec![p.clone()],
            None => self.registry.principals(),
        };
        let grants: Vec<Grant> = principals
            .iter()
            .flat_map(|p| self.registry.list(p))
            .collect();
        self.audit
            .append(AuditRecord::new(
                Actor::Administrator(by.to_string()),
                AuditEvent::CapabilitiesListed {
                    principal: principal.cloned(),
                    count: grants.len(),
                },
            ))
            .await?;
        Ok(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_clock::{ClockService, ManualTimeSource};
    use bulwark_core::{NodeId, Timestamp};
    use bulwark_crypto::KeyPair;

    use bulwark_storage::KvStore;

    use crate::error::{ErrorKind, GuardError};
    use crate::testing::FlakyStore;

    fn admin() -> (CapabilityAdmin, Arc<ManualTimeSource>) {
        let source = Arc::new(ManualTimeSource::new(Timestamp::now()));
        let clock = Arc::new(ClockService::new(NodeId::new("test"), source.clone()));
        let registry = Arc::new(CapabilityRegistry::new(Arc::clone(&clock)));
        let audit = Arc::new(AuditLog::in_memory(clock, KeyPair::generate()));
        (CapabilityAdmin::new(registry, audit), source)
    }

    #[tokio::test]
    async fn test_each_mutation_writes_one_entry() {
        let (admin, _) = admin();
        let agent = PrincipalId::new("agent");
        let grant = admin
            .grant(&agent, Capability::parse("fs:read:/data/**").unwrap(), None, "ops")
            .await
            .unwrap();
        assert_eq!(admin.audit.len().await, 1);
        assert_eq!(admin.list(Some(&agent), "ops").await.unwrap().len(), 1);
        assert_eq!(admin.audit.len().await, 2);

        admin.revoke(grant.id, "ops").await.unwrap();
        assert_eq!(admin.audit.len().await, 3);
        assert!(admin.list(None, "ops").await.unwrap().is_empty());

        let entries = admin.audit.entries(bulwark_audit::SequenceRange::all()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.event.name()).collect();
        assert_eq!(
            names,
            vec![
                "capability_granted",
                "capabilities_listed",
                "capability_revoked",
                "capabilities_listed",
            ]
        );
        assert_eq!(
            entries[1].event,
            AuditEvent::CapabilitiesListed {
                principal: Some(agent.clone()),
                count: 1,
            }
        );
        assert_eq!(entries[2].actor, Actor::Administrator("ops".to_string()));
    }

    async fn admin_over(store: Arc<FlakyStore>) -> CapabilityAdmin {
        let clock = Arc::new(ClockService::system(NodeId::new("test")));
        let registry = Arc::new(CapabilityRegistry::with_store(
            Arc::clone(&clock),
            Arc::clone(&store) as Arc<dyn KvStore>,
        ));
        let audit = AuditLog::open(store, clock, KeyPair::generate())
            .await
            .unwrap();
        CapabilityAdmin::new(registry, Arc::new(audit))
    }

    #[tokio::test]
    async fn test_unrecorded_grant_is_withdrawn() {
        let store = Arc::new(FlakyStore::new("audit:entries", 0));
        let admin = admin_over(Arc::clone(&store)).await;
        let agent = PrincipalId::new("agent");
        let read = Capability::parse("fs:read:/data/**").unwrap();

        let err = admin
            .grant(&agent, read.clone(), None, "ops")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuditWrite);
        assert!(!admin.registry.check(&agent, std::slice::from_ref(&read)));
        assert!(store.list_keys("caps:grants").await.unwrap().is_empty());
        assert!(admin.audit.is_empty().await);
    }

    #[tokio::test]
    async fn test_unrecorded_revoke_is_undone() {
        let store = Arc::new(FlakyStore::new("audit:entries", 1));
        let admin = admin_over(Arc::clone(&store)).await;
        let agent = PrincipalId::new("agent");
        let read = Capability::parse("fs:read:/data/**").unwrap();
        let grant = admin.grant(&agent, read.clone(), None, "ops").await.unwrap();

        let err = admin.revoke(grant.id, "ops").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuditWrite);
        assert!(admin.registry.check(&agent, std::slice::from_ref(&read)));
        assert!(admin.registry.tombstone(grant.id).is_none());
        assert_eq!(admin.audit.len().await, 1);

        let reloaded = CapabilityRegistry::with_store(
            Arc::new(ClockService::system(NodeId::new("test"))),
            store as Arc<dyn KvStore>,
        );
        assert_eq!(reloaded.load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_listing_is_withheld() {
        let store = Arc::new(FlakyStore::new("audit:entries", 1));
        let admin = admin_over(Arc::clone(&store)).await;
        let agent = PrincipalId::new("agent");
        admin
            .grant(&agent, Capability::parse("kv:get:/app/**").unwrap(), None, "ops")
            .await
            .unwrap();

        store.break_now();
        let err = admin.list(Some(&agent), "ops").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuditWrite);
    }

    #[tokio::test]
    async fn test_failed_revoke_is_not_audited() {
        let (admin, _) = admin();
        let err = admin.revoke(GrantId::new(), "ops").await.unwrap_err();
        assert!(matches!(err, GuardError::Capability(_)));
        assert!(admin.audit.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_audits_only_when_non_empty() {
        let (admin, source) = admin();
        let agent = PrincipalId::new("agent");
        assert!(admin.sweep_expired().await.unwrap().is_empty());
        assert!(admin.audit.is_empty().await);

        admin
            .grant(
                &agent,
                Capability::parse("kv:write:/tmp/**").unwrap(),
                Some(Duration::from_secs(10)),
                "ops",
            )
            .await
            .unwrap();
        source.advance(Duration::from_secs(11));
        assert_eq!(admin.sweep_expired().await.unwrap().len(), 1);

        let entries = admin.audit.entries(bulwark_audit::SequenceRange::all()).await.unwrap();
        assert_eq!(entries.last().unwrap().event.name(), "grants_expired");
        assert_eq!(entries.last().unwrap().actor, Actor::System);
    }
}
