//! Checkpoints and the store that creates, restores and discards them.
//!
//! Creating a checkpoint locks its scope exclusively; the lock is held
//! until the checkpoint is committed or rolled back. Actions below the
//! checkpoint floor take the same lock through
//! [`CheckpointStore::lock_scope`], so no other action can mutate the
//! captured state in between.

use std::sync::Arc;
use std::time::Duration;

use bulwark_clock::ClockService;
use bulwark_core::{ActionId, CheckpointId, PrincipalId, Timestamp};
use bulwark_crypto::{ContentHash, FieldHasher};
use bulwark_storage::{KvStore, ScopedKvStore};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CheckpointError, CheckpointResult};
use crate::scope::{CheckpointScope, ScopeGuard, ScopeLocks};
use crate::state::{StateSnapshot, StateStore};

/// Domain separator for checkpoint integrity hashes.
pub const CHECKPOINT_HASH_DOMAIN: &str = "bulwark.checkpoint.v1";

/// Default wait for a contended scope.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

// -- Namespace constants --

const NS_SNAPSHOTS: &str = "checkpoint:snapshots";

fn record_key(id: CheckpointId) -> String {
    id.0.to_string()
}

/// A scoped snapshot taken before a risky action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id.
    pub id: CheckpointId,
    /// The action the snapshot guards.
    pub action_id: ActionId,
    /// Only this principal may restore it.
    pub principal: PrincipalId,
    /// What was captured.
    pub scope: CheckpointScope,
    /// The captured state.
    pub snapshot: StateSnapshot,
    /// Hash over every other field.
    pub integrity: ContentHash,
    /// Clock service time of capture.
    pub created_at: Timestamp,
}

impl Checkpoint {
    fn compute_integrity(&self) -> CheckpointResult<ContentHash> {
        let scope =
            serde_json::to_vec(&self.scope).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let snapshot = serde_json::to_vec(&self.snapshot)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(FieldHasher::new(CHECKPOINT_HASH_DOMAIN)
            .field(self.id.0.as_bytes())
            .field(self.action_id.0.as_bytes())
            .str_field(self.principal.as_str())
            .i64_field(self.created_at.as_micros())
            .field(&scope)
            .field(&snapshot)
            .finish())
    }

    /// Whether the snapshot still matches its integrity hash.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        self.compute_integrity()
            .is_ok_and(|hash| hash == self.integrity)
    }

    /// Whether the snapshot is younger than `max_age` at `now`.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration, now: Timestamp) -> bool {
        now.duration_since(self.created_at) < max_age
    }

    /// Captured bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.snapshot.byte_len()
    }
}

struct Live {
    checkpoint: Checkpoint,
    _guard: ScopeGuard,
}

/// Creates checkpoints under exclusive scope locks and restores them.
pub struct CheckpointStore {
    clock: Arc<ClockService>,
    states: Arc<dyn StateStore>,
    locks: ScopeLocks,
    lock_timeout: Duration,
    persisted: Option<ScopedKvStore>,
    live: DashMap<CheckpointId, Live>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("live", &self.live.len())
            .field("lock_timeout", &self.lock_timeout)
            .field("persistent", &self.persisted.is_some())
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Create a store that captures state through `states`.
    #[must_use]
    pub fn new(clock: Arc<ClockService>, states: Arc<dyn StateStore>) -> Self {
        Self {
            clock,
            states,
            locks: ScopeLocks::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            persisted: None,
            live: DashMap::new(),
        }
    }

    /// Wait at most `timeout` for a contended scope.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Share a lock table with other stores.
    #[must_use]
    pub fn with_locks(mut self, locks: ScopeLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Persist checkpoints to `store` so they survive a restart.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the namespace is rejected.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> CheckpointResult<Self> {
        self.persisted = Some(ScopedKvStore::new(store, NS_SNAPSHOTS)?);
        Ok(self)
    }

    /// The scope lock table.
    #[must_use]
    pub fn locks(&self) -> &ScopeLocks {
        &self.locks
    }

    /// Lock `scope` without capturing it, for actions that write state
    /// but take no checkpoint. The lock is released when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::LockTimeout`] if the scope stays
    /// contended.
    pub async fn lock_scope(&self, scope: &CheckpointScope) -> CheckpointResult<ScopeGuard> {
        self.locks.acquire(scope, self.lock_timeout).await
    }

    /// Lock `scope` and capture it.
    ///
    /// The lock stays held until [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback).
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::LockTimeout`] if the scope stays
    /// contended, or any capture or storage error. On error no lock is
    /// held and nothing is persisted.
    pub async fn create(
        &self,
        action_id: ActionId,
        principal: &PrincipalId,
        scope: CheckpointScope,
    ) -> CheckpointResult<Checkpoint> {
        let guard = self.locks.acquire(&scope, self.lock_timeout).await?;

        let mut snapshot = StateSnapshot::default();
        for entry in scope.entries() {
            snapshot.states.push(self.states.capture(entry).await?);
        }

        let mut checkpoint = Checkpoint {
            id: CheckpointId::new(),
            action_id,
            principal: principal.clone(),
            scope,
            snapshot,
            integrity: ContentHash::zero(),
            created_at: self.clock.now(),
        };
        checkpoint.integrity = checkpoint.compute_integrity()?;

        if let Some(persisted) = &self.persisted {
            persisted
                .set_json(&record_key(checkpoint.id), &checkpoint)
                .await?;
        }
        self.live.insert(
            checkpoint.id,
            Live {
                checkpoint: checkpoint.clone(),
                _guard: guard,
            },
        );

        info!(
            checkpoint_id = %checkpoint.id,
            action_id = %action_id,
            scope = %checkpoint.scope,
            bytes = checkpoint.byte_len(),
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Look up a checkpoint, live or persisted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the persisted record cannot be read.
    pub async fn get(&self, id: CheckpointId) -> CheckpointResult<Option<Checkpoint>> {
        if let Some(live) = self.live.get(&id) {
            return Ok(Some(live.checkpoint.clone()));
        }
        match &self.persisted {
            Some(persisted) => Ok(persisted.get_json(&record_key(id)).await?),
            None => Ok(None),
        }
    }

    async fn require(&self, id: CheckpointId) -> CheckpointResult<Checkpoint> {
        self.get(id).await?.ok_or_else(|| CheckpointError::NotFound {
            checkpoint_id: id.to_string(),
        })
    }

    /// Replace current state with the snapshot.
    ///
    /// Idempotent: restoring twice yields the same state as once. The
    /// checkpoint is kept.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::PrincipalMismatch`] if `principal` did
    /// not create it, [`CheckpointError::IntegrityMismatch`] if the
    /// snapshot was altered, or any restore error.
    pub async fn restore(
        &self,
        id: CheckpointId,
        principal: &PrincipalId,
    ) -> CheckpointResult<Checkpoint> {
        let checkpoint = self.require(id).await?;
        if checkpoint.principal != *principal {
            return Err(CheckpointError::PrincipalMismatch {
                checkpoint_id: id.to_string(),
                owner: checkpoint.principal.to_string(),
                caller: principal.to_string(),
            });
        }
        if !checkpoint.verify_integrity() {
            warn!(checkpoint_id = %id, "checkpoint integrity check failed");
            return Err(CheckpointError::IntegrityMismatch {
                checkpoint_id: id.to_string(),
            });
        }

        // A checkpoint reloaded from storage holds no lock yet.
        let _guard = if self.live.contains_key(&id) {
            None
        } else {
            Some(
                self.locks
                    .acquire(&checkpoint.scope, self.lock_timeout)
                    .await?,
            )
        };

        for state in &checkpoint.snapshot.states {
            self.states.restore(&state.entry, state).await?;
        }
        info!(checkpoint_id = %id, scope = %checkpoint.scope, "checkpoint restored");
        Ok(checkpoint)
    }

    /// Restore, then discard the checkpoint and release its scope.
    ///
    /// # Errors
    ///
    /// Same as [`restore`](Self::restore); on error the checkpoint is kept
    /// so the restore can be retried.
    pub async fn rollback(
        &self,
        id: CheckpointId,
        principal: &PrincipalId,
    ) -> CheckpointResult<Checkpoint> {
        let checkpoint = self.restore(id, principal).await?;
        self.discard(id).await?;
        Ok(checkpoint)
    }

    /// Discard the snapshot without restoring and release its scope.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] for an unknown id, or a
    /// storage error.
    pub async fn commit(&self, id: CheckpointId) -> CheckpointResult<()> {
        let known = self.live.contains_key(&id) || self.require(id).await.is_ok();
        if !known {
            return Err(CheckpointError::NotFound {
                checkpoint_id: id.to_string(),
            });
        }
        self.discard(id).await?;
        info!(checkpoint_id = %id, "checkpoint committed");
        Ok(())
    }

    async fn discard(&self, id: CheckpointId) -> CheckpointResult<()> {
        if let Some(persisted) = &self.persisted {
            persisted.delete(&record_key(id)).await?;
        }
        if self.live.remove(&id).is_some() {
            debug!(checkpoint_id = %id, "scope released");
        }
        Ok(())
    }

    /// Every known checkpoint, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persisted records cannot be read.
    pub async fn list(&self) -> CheckpointResult<Vec<Checkpoint>> {
        let mut all: Vec<Checkpoint> = match &self.persisted {
            Some(persisted) => persisted
                .all_json::<Checkpoint>()
                .await?
                .into_iter()
                .map(|(_, c)| c)
                .collect(),
            None => Vec::new(),
        };
        for live in &self.live {
            if !all.iter().any(|c| c.id == live.checkpoint.id) {
                all.push(live.checkpoint.clone());
            }
        }
        all.sort_by_key(|c| (c.created_at, c.id));
        Ok(all)
    }
}
