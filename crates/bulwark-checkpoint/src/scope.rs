//! Checkpoint scopes and the exclusive scope lock table.
//!
//! A scope is the set of stateful resource prefixes an action may write.
//! Two scopes conflict when any of their entries share a class and one
//! path is a segment-wise prefix of the other, so `/a` conflicts with
//! `/a/b` but not with `/ab`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bulwark_capabilities::{Capability, ResourceClass};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{CheckpointError, CheckpointResult};

/// Resource classes whose state can be captured and restored.
pub const STATEFUL_CLASSES: [ResourceClass; 2] = [ResourceClass::Fs, ResourceClass::Kv];

/// One resource prefix inside a scope, e.g. `fs:/workspace/project`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeEntry {
    /// The resource class.
    pub class: ResourceClass,
    /// Literal path segments.
    pub path: Vec<String>,
}

impl ScopeEntry {
    /// Build an entry from a class and literal segments.
    #[must_use]
    pub fn new(class: ResourceClass, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            class,
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the two entries touch any common resource.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.class != other.class {
            return false;
        }
        self.path
            .iter()
            .zip(other.path.iter())
            .all(|(a, b)| a == b)
    }

    /// The path joined with `/`.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }
}

impl fmt::Display for ScopeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.class, self.path_string())
    }
}

/// The state an action may mutate, derived from its write capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointScope {
    entries: BTreeSet<ScopeEntry>,
}

impl CheckpointScope {
    /// Derive the scope from declared capabilities.
    ///
    /// Only capabilities whose action may mutate and whose class is
    /// stateful contribute. Each contributes its literal prefix up to the
    /// first wildcard. Entries nested under another entry are folded into
    /// it.
    #[must_use]
    pub fn from_capabilities<'a>(capabilities: impl IntoIterator<Item = &'a Capability>) -> Self {
        capabilities
            .into_iter()
            .filter(|c| c.action().may_mutate() && STATEFUL_CLASSES.contains(&c.class()))
            .map(|c| ScopeEntry::new(c.class(), c.scope().literal_prefix()))
            .collect()
    }

    /// The entries, in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = &ScopeEntry> {
        self.entries.iter()
    }

    /// Whether there is nothing to snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any entry overlaps any entry of `other`.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.entries
            .iter()
            .any(|a| other.entries.iter().any(|b| a.overlaps(b)))
    }

    fn insert(&mut self, entry: ScopeEntry) {
        if self
            .entries
            .iter()
            .any(|e| e.class == entry.class && entry.path.starts_with(&e.path))
        {
            return;
        }
        self.entries
            .retain(|e| !(e.class == entry.class && e.path.starts_with(&entry.path)));
        self.entries.insert(entry);
    }
}

impl FromIterator<ScopeEntry> for CheckpointScope {
    fn from_iter<I: IntoIterator<Item = ScopeEntry>>(iter: I) -> Self {
        let mut scope = Self::default();
        for entry in iter {
            scope.insert(entry);
        }
        scope
    }
}

impl fmt::Display for CheckpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

struct Held {
    token: u64,
    scope: CheckpointScope,
}

#[derive(Default)]
struct LockTable {
    held: Mutex<Vec<Held>>,
    next_token: AtomicU64,
    released: Notify,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, Vec<Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }
}

/// Exclusive locks over checkpoint scopes.
///
/// Acquisition is all-or-nothing: either every entry of a scope is locked
/// or none is. Waiters are woken whenever any scope is released.
#[derive(Clone, Default)]
pub struct ScopeLocks {
    table: Arc<LockTable>,
}

impl fmt::Debug for ScopeLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeLocks")
            .field("held", &self.table.held().len())
            .finish()
    }
}

impl ScopeLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `scope` if nothing overlapping is held.
    #[must_use]
    pub fn try_acquire(&self, scope: &CheckpointScope) -> Option<ScopeGuard> {
        let mut held = self.table.held();
        if held.iter().any(|h| h.scope.conflicts_with(scope)) {
            return None;
        }
        let token = self.table.token();
        held.push(Held {
            token,
            scope: scope.clone(),
        });
        Some(ScopeGuard {
            table: Arc::clone(&self.table),
            token,
            scope: scope.clone(),
        })
    }

    /// Lock `scope`, waiting up to `timeout` for overlapping holders.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::LockTimeout`] if the scope is still
    /// contended when the timeout elapses.
    pub async fn acquire(
        &self,
        scope: &CheckpointScope,
        timeout: Duration,
    ) -> CheckpointResult<ScopeGuard> {
        let attempt = async {
            loop {
                let released = self.table.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();
                if let Some(guard) = self.try_acquire(scope) {
                    return guard;
                }
                debug!(scope = %scope, "scope contended, waiting for release");
                released.await;
            }
        };
        tokio::time::timeout(timeout, attempt).await.map_err(|_| {
            warn!(scope = %scope, ?timeout, "scope lock timed out");
            CheckpointError::LockTimeout {
                scope: scope.to_string(),
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
        })
    }

    /// Scopes currently locked.
    #[must_use]
    pub fn held(&self) -> Vec<CheckpointScope> {
        self.table.held().iter().map(|h| h.scope.clone()).collect()
    }
}

/// Holds a scope lock until dropped.
pub struct ScopeGuard {
    table: Arc<LockTable>,
    token: u64,
    scope: CheckpointScope,
}

impl ScopeGuard {
    /// The locked scope.
    #[must_use]
    pub fn scope(&self) -> &CheckpointScope {
        &self.scope
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.table.held().retain(|h| h.token != self.token);
        self.table.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(patterns: &[&str]) -> CheckpointScope {
        let caps: Vec<Capability> = patterns
            .iter()
            .map(|p| Capability::parse(p).unwrap())
            .collect();
        CheckpointScope::from_capabilities(&caps)
    }

    #[test]
    fn test_scope_uses_write_prefixes_only() {
        let s = scope(&[
            "fs:read:/etc/**",
            "fs:write:/workspace/out/**",
            "kv:set:/app/settings/*",
            "net:connect:/api.example.com",
            "exec:run:/usr/bin/git",
        ]);
        let entries: Vec<String> = s.entries().map(ToString::to_string).collect();
        assert_eq!(entries, vec!["fs:/workspace/out", "kv:/app/settings"]);
    }

    #[test]
    fn test_nested_entries_fold() {
        let s = scope(&["fs:write:/a/b/c", "fs:write:/a/**", "fs:write:/ab"]);
        let entries: Vec<String> = s.entries().map(ToString::to_string).collect();
        assert_eq!(entries, vec!["fs:/a", "fs:/ab"]);
    }

    #[test]
    fn test_overlap_is_segment_wise() {
        let a = ScopeEntry::new(ResourceClass::Fs, ["a"]);
        let ab = ScopeEntry::new(ResourceClass::Fs, ["a", "b"]);
        let a2 = ScopeEntry::new(ResourceClass::Fs, ["ab"]);
        let kv = ScopeEntry::new(ResourceClass::Kv, ["a"]);
        assert!(a.overlaps(&ab));
        assert!(ab.overlaps(&a));
        assert!(!a.overlaps(&a2));
        assert!(!a.overlaps(&kv));
    }

    #[tokio::test]
    async fn test_conflicting_scope_waits_for_release() {
        let locks = ScopeLocks::new();
        let first = locks
            .acquire(&scope(&["fs:write:/a/**"]), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(locks.try_acquire(&scope(&["fs:write:/a/b"])).is_none());
        assert!(locks.try_acquire(&scope(&["fs:write:/b"])).is_some());

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire(&scope(&["fs:write:/a/b"]), Duration::from_secs(5))
                    .await
                    .map(|g| g.scope().len())
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_times_out() {
        let locks = ScopeLocks::new();
        let _held = locks.try_acquire(&scope(&["kv:set:/app/**"])).unwrap();
        let err = locks
            .acquire(&scope(&["kv:set:/app/x", "fs:write:/tmp/y"]), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::LockTimeout { .. }));
        // All-or-nothing: the non-conflicting fs entry was not left locked.
        assert!(locks.try_acquire(&scope(&["fs:write:/tmp/y"])).is_some());
    }

    #[test]
    fn test_empty_scope_never_conflicts() {
        let locks = ScopeLocks::new();
        let _a = locks.try_acquire(&CheckpointScope::default()).unwrap();
        let _b = locks.try_acquire(&CheckpointScope::default()).unwrap();
        assert_eq!(locks.held().len(), 2);
    }
}
