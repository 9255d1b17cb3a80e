//! The capability registry.
//!
//! Grants are indexed in memory by principal, so [`CapabilityRegistry::check`]
//! never touches disk or network. When a [`KvStore`] is attached, every
//! mutation is persisted before it becomes visible in memory.

use std::sync::Arc;
use std::time::Duration;

use bulwark_clock::ClockService;
use bulwark_core::{GrantId, PrincipalId, Timestamp};
use bulwark_storage::{KvStore, KvWrite, ScopedKvStore};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CapabilityError, CapabilityResult};
use crate::grant::{CapabilityCheck, Grant, RevocationReason, Tombstone};
use crate::pattern::Capability;

// -- Namespace constants --

const NS_GRANTS: &str = "caps:grants";
const NS_TOMBSTONES: &str = "caps:tombstones";

fn record_key(id: GrantId) -> String {
    id.0.to_string()
}

/// Result of [`CapabilityRegistry::issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    /// The live grant.
    pub grant: Grant,
    /// Whether this call created it.
    pub created: bool,
}

fn encode<T: serde::Serialize>(value: &T) -> CapabilityResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CapabilityError::Serialization(e.to_string()))
}

/// Stores grants per principal and answers capability checks.
///
/// Reads are lock-free with respect to other principals; each principal's
/// grant list is replaced under its map entry lock, so a concurrent
/// [`check`](Self::check) sees either the state before or after a mutation.
/// Administrative mutations are serialized among themselves.
pub struct CapabilityRegistry {
    clock: Arc<ClockService>,
    grants: DashMap<PrincipalId, Vec<Grant>>,
    owners: DashMap<GrantId, PrincipalId>,
    tombstones: DashMap<GrantId, Tombstone>,
    store: Option<Arc<dyn KvStore>>,
    admin: Mutex<()>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("principals", &self.grants.len())
            .field("grants", &self.owners.len())
            .field("tombstones", &self.tombstones.len())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl CapabilityRegistry {
    /// Create an in-memory registry.
    #[must_use]
    pub fn new(clock: Arc<ClockService>) -> Self {
        Self {
            clock,
            grants: DashMap::new(),
            owners: DashMap::new(),
            tombstones: DashMap::new(),
            store: None,
            admin: Mutex::new(()),
        }
    }

    /// Create a registry persisted to `store`. Call [`load`](Self::load)
    /// to rehydrate existing grants.
    #[must_use]
    pub fn with_store(clock: Arc<ClockService>, store: Arc<dyn KvStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(clock)
        }
    }

    /// Rehydrate grants and tombstones from the attached store.
    ///
    /// Grants that have a tombstone are skipped. Returns the number of
    /// grants loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record does not parse.
    pub async fn load(&self) -> CapabilityResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let _admin = self.admin.lock().await;

        let tombstones: Vec<(String, Tombstone)> =
            ScopedKvStore::new(Arc::clone(store), NS_TOMBSTONES)?
                .all_json()
                .await?;
        for (_, tombstone) in tombstones {
            self.tombstones.insert(tombstone.grant_id, tombstone);
        }

        let grants: Vec<(String, Grant)> = ScopedKvStore::new(Arc::clone(store), NS_GRANTS)?
            .all_json()
            .await?;
        let mut loaded: usize = 0;
        for (_, grant) in grants {
            if self.tombstones.contains_key(&grant.id) {
                warn!(grant_id = %grant.id, "skipping grant with tombstone");
                continue;
            }
            self.owners.insert(grant.id, grant.principal.clone());
            self.grants
                .entry(grant.principal.clone())
                .or_default()
                .push(grant);
            loaded = loaded.saturating_add(1);
        }

        info!(
            grants = loaded,
            tombstones = self.tombstones.len(),
            "loaded capability registry"
        );
        Ok(loaded)
    }

    /// Whether `principal` holds every capability in `required`.
    ///
    /// An empty `required` set is trivially satisfied. Expired grants are
    /// treated as absent.
    #[must_use]
    pub fn check(&self, principal: &PrincipalId, required: &[Capability]) -> bool {
        if required.is_empty() {
            return true;
        }
        let now = self.clock.now();
        let Some(held) = self.grants.get(principal) else {
            return false;
        };
        required.iter().all(|req| {
            held.iter()
                .any(|g| !g.is_expired_at(now) && g.capability.covers(req))
        })
    }

    /// Like [`check`](Self::check), reporting which capabilities are missing.
    #[must_use]
    pub fn check_detailed(&self, principal: &PrincipalId, required: &[Capability]) -> CapabilityCheck {
        let now = self.clock.now();
        let held = self.grants.get(principal);
        let mut result = CapabilityCheck::default();
        for req in required {
            let covered = held.as_ref().is_some_and(|grants| {
                grants
                    .iter()
                    .any(|g| !g.is_expired_at(now) && g.capability.covers(req))
            });
            if covered {
                result.granted.push(req.clone());
            } else {
                result.missing.push(req.clone());
            }
        }
        result
    }

    /// Grant `capability` to `principal`.
    ///
    /// If the principal already holds a live grant for the identical
    /// pattern, that grant is returned unchanged. An expired grant for the
    /// same pattern is tombstoned and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidTtl`] for a zero TTL, or a storage
    /// error if persisting fails (in which case nothing changes).
    pub async fn grant(
        &self,
        principal: &PrincipalId,
        capability: Capability,
        ttl: Option<Duration>,
        issuer: &str,
    ) -> CapabilityResult<Grant> {
        self.issue(principal, capability, ttl, issuer)
            .await
            .map(|issued| issued.grant)
    }

    /// [`grant`](Self::grant), also reporting whether a new grant was
    /// created or an identical live one returned.
    ///
    /// # Errors
    ///
    /// Same as [`grant`](Self::grant).
    pub async fn issue(
        &self,
        principal: &PrincipalId,
        capability: Capability,
        ttl: Option<Duration>,
        issuer: &str,
    ) -> CapabilityResult<Issued> {
        if ttl.is_some_and(|t| t.is_zero()) {
            return Err(CapabilityError::InvalidTtl);
        }
        let _admin = self.admin.lock().await;
        let now = self.clock.now();

        let mut replaced = Vec::new();
        if let Some(held) = self.grants.get(principal) {
            for existing in held.iter().filter(|g| g.capability == capability) {
                if existing.is_expired_at(now) {
                    replaced.push(Tombstone::for_grant(existing, now, RevocationReason::Expired));
                } else {
                    debug!(grant_id = %existing.id, "identical live grant exists");
                    return Ok(Issued {
                        grant: existing.clone(),
                        created: false,
                    });
                }
            }
        }

        let grant = Grant {
            id: GrantId::new(),
            principal: principal.clone(),
            capability,
            issued_at: now,
            expires_at: ttl.map(|t| now.saturating_add(t)),
            issuer: issuer.to_string(),
        };

        if let Some(store) = &self.store {
            let mut writes = vec![KvWrite::set(NS_GRANTS, record_key(grant.id), encode(&grant)?)];
            for tombstone in &replaced {
                writes.push(KvWrite::delete(NS_GRANTS, record_key(tombstone.grant_id)));
                writes.push(KvWrite::set(
                    NS_TOMBSTONES,
                    record_key(tombstone.grant_id),
                    encode(tombstone)?,
                ));
            }
            store.apply(writes).await?;
        }

        {
            let mut held = self.grants.entry(principal.clone()).or_default();
            held.retain(|g| !replaced.iter().any(|t| t.grant_id == g.id));
            held.push(grant.clone());
        }
        for tombstone in replaced {
            self.owners.remove(&tombstone.grant_id);
            self.tombstones.insert(tombstone.grant_id, tombstone);
        }
        self.owners.insert(grant.id, principal.clone());

        info!(
            grant_id = %grant.id,
            principal = %principal,
            capability = %grant.capability,
            expires_at = ?grant.expires_at,
            "capability granted"
        );
        Ok(Issued {
            grant,
            created: true,
        })
    }

    /// Withdraw a grant that never took effect, e.g. because its issuance
    /// could not be recorded. Unlike [`revoke`](Self::revoke) no tombstone
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::GrantNotFound`] if the grant is not live,
    /// or a storage error (in which case nothing changes).
    pub async fn discard(&self, grant_id: GrantId) -> CapabilityResult<()> {
        let _admin = self.admin.lock().await;
        let Some(principal) = self.owners.get(&grant_id).map(|p| p.clone()) else {
            return Err(CapabilityError::GrantNotFound {
                grant_id: grant_id.to_string(),
            });
        };
        if let Some(store) = &self.store {
            store.delete(NS_GRANTS, &record_key(grant_id)).await?;
        }
        if let Some(mut held) = self.grants.get_mut(&principal) {
            held.retain(|g| g.id != grant_id);
        }
        self.grants.remove_if(&principal, |_, held| held.is_empty());
        self.owners.remove(&grant_id);
        warn!(grant_id = %grant_id, principal = %principal, "grant discarded");
        Ok(())
    }

    /// Undo a removal that could not be recorded: drop the tombstones of
    /// `grants` and make them live again.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persisting fails (in which case nothing
    /// changes).
    pub async fn reinstate(&self, grants: Vec<Grant>) -> CapabilityResult<()> {
        let _admin = self.admin.lock().await;
        if let Some(store) = &self.store {
            let mut writes = Vec::with_capacity(grants.len().saturating_mul(2));
            for grant in &grants {
                writes.push(KvWrite::delete(NS_TOMBSTONES, record_key(grant.id)));
                writes.push(KvWrite::set(NS_GRANTS, record_key(grant.id), encode(grant)?));
            }
            store.apply(writes).await?;
        }
        for grant in grants {
            warn!(grant_id = %grant.id, principal = %grant.principal, "grant reinstated");
            self.tombstones.remove(&grant.id);
            self.owners.insert(grant.id, grant.principal.clone());
            let mut held = self.grants.entry(grant.principal.clone()).or_default();
            if !held.iter().any(|g| g.id == grant.id) {
                held.push(grant);
            }
        }
        Ok(())
    }

    /// Revoke a grant, recording a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::AlreadyRevoked`] if the grant was already
    /// removed, [`CapabilityError::GrantNotFound`] if it never existed, or
    /// a storage error.
    pub async fn revoke(&self, grant_id: GrantId) -> CapabilityResult<Tombstone> {
        let _admin = self.admin.lock().await;

        let Some(principal) = self.owners.get(&grant_id).map(|p| p.clone()) else {
            return Err(if self.tombstones.contains_key(&grant_id) {
                CapabilityError::AlreadyRevoked {
                    grant_id: grant_id.to_string(),
                }
            } else {
                CapabilityError::GrantNotFound {
                    grant_id: grant_id.to_string(),
                }
            });
        };

        let grant = self
            .grants
            .get(&principal)
            .and_then(|held| held.iter().find(|g| g.id == grant_id).cloned())
            .ok_or_else(|| CapabilityError::GrantNotFound {
                grant_id: grant_id.to_string(),
            })?;

        let tombstone = Tombstone::for_grant(&grant, self.clock.now(), RevocationReason::Revoked);
        self.remove(vec![tombstone.clone()]).await?;

        info!(grant_id = %grant_id, principal = %principal, "capability revoked");
        Ok(tombstone)
    }

    /// Tombstone every expired grant. Returns the tombstones written.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persisting fails (in which case nothing
    /// changes).
    pub async fn sweep_expired(&self) -> CapabilityResult<Vec<Tombstone>> {
        let _admin = self.admin.lock().await;
        let now = self.clock.now();

        let expired: Vec<Tombstone> = self
            .grants
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|g| g.is_expired_at(now))
                    .map(|g| Tombstone::for_grant(g, now, RevocationReason::Expired))
                    .collect::<Vec<_>>()
            })
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }
        self.remove(expired.clone()).await?;
        info!(count = expired.len(), "swept expired grants");
        Ok(expired)
    }

    /// Persist and apply removals. Caller holds the admin lock.
    async fn remove(&self, tombstones: Vec<Tombstone>) -> CapabilityResult<()> {
        if let Some(store) = &self.store {
            let mut writes = Vec::with_capacity(tombstones.len().saturating_mul(2));
            for tombstone in &tombstones {
                writes.push(KvWrite::delete(NS_GRANTS, record_key(tombstone.grant_id)));
                writes.push(KvWrite::set(
                    NS_TOMBSTONES,
                    record_key(tombstone.grant_id),
                    encode(tombstone)?,
                ));
            }
            store.apply(writes).await?;
        }

        for tombstone in tombstones {
            if let Some(mut held) = self.grants.get_mut(&tombstone.principal) {
                held.retain(|g| g.id != tombstone.grant_id);
            }
            self.grants
                .remove_if(&tombstone.principal, |_, held| held.is_empty());
            self.owners.remove(&tombstone.grant_id);
            self.tombstones.insert(tombstone.grant_id, tombstone);
        }
        Ok(())
    }

    /// Live grants held by `principal`, oldest first.
    #[must_use]
    pub fn list(&self, principal: &PrincipalId) -> Vec<Grant> {
        let now = self.clock.now();
        let mut grants: Vec<Grant> = self
            .grants
            .get(principal)
            .map(|held| {
                held.iter()
                    .filter(|g| !g.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        grants.sort_by_key(|g| g.issued_at);
        grants
    }

    /// Live capability patterns held by `principal`.
    #[must_use]
    pub fn capabilities(&self, principal: &PrincipalId) -> Vec<Capability> {
        self.list(principal)
            .into_iter()
            .map(|g| g.capability)
            .collect()
    }

    /// Look up a grant by id, whether or not it has expired.
    #[must_use]
    pub fn get(&self, grant_id: GrantId) -> Option<Grant> {
        let principal = self.owners.get(&grant_id)?.clone();
        self.grants
            .get(&principal)?
            .iter()
            .find(|g| g.id == grant_id)
            .cloned()
    }

    /// The tombstone for a removed grant, if any.
    #[must_use]
    pub fn tombstone(&self, grant_id: GrantId) -> Option<Tombstone> {
        self.tombstones.get(&grant_id).map(|t| t.clone())
    }

    /// Principals holding at least one grant (live or not yet swept).
    #[must_use]
    pub fn principals(&self) -> Vec<PrincipalId> {
        let mut principals: Vec<PrincipalId> =
            self.grants.iter().map(|e| e.key().clone()).collect();
        principals.sort();
        principals
    }

    /// The clock this registry judges expiry against.
    #[must_use]
    pub fn clock(&self) -> &Arc<ClockService> {
        &self.clock
    }

    /// Current time per the registry's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}
