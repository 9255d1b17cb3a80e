//! Key-value state backend.
//!
//! A `kv:` scope `/app/settings` maps to namespace `state:app` and the key
//! prefix `settings`. Keys are `/`-separated below the namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_capabilities::ResourceClass;
use bulwark_storage::{KvStore, KvWrite};
use tracing::debug;

use crate::error::{CheckpointError, CheckpointResult};
use crate::scope::ScopeEntry;
use crate::state::{Blob, ScopeState, StateStore};

/// Prefix for namespaces that hold action state.
pub const STATE_NAMESPACE_PREFIX: &str = "state:";

/// Captures and restores `kv:` scopes in a [`KvStore`].
#[derive(Clone)]
pub struct KvStateStore {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for KvStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStateStore").finish_non_exhaustive()
    }
}

struct Location {
    namespace: String,
    prefix: String,
}

impl Location {
    fn resolve(entry: &ScopeEntry) -> CheckpointResult<Self> {
        if entry.class != ResourceClass::Kv {
            return Err(CheckpointError::Unsupported { class: entry.class });
        }
        let Some((first, rest)) = entry.path.split_first() else {
            return Err(CheckpointError::ScopeTooBroad {
                entry: entry.to_string(),
            });
        };
        Ok(Self {
            namespace: format!("{STATE_NAMESPACE_PREFIX}{first}"),
            prefix: rest.join("/"),
        })
    }

    /// The relative key of `key`, if it lies under the prefix.
    fn relative<'k>(&self, key: &'k str) -> Option<&'k str> {
        if self.prefix.is_empty() {
            return Some(key);
        }
        let rest = key.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('/')
        }
    }

    fn absolute(&self, relative: &str) -> String {
        match (self.prefix.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{relative}", self.prefix),
        }
    }
}

impl KvStateStore {
    /// Back `kv:` scopes with `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn current(&self, location: &Location) -> CheckpointResult<BTreeMap<String, Vec<u8>>> {
        let start = (!location.prefix.is_empty()).then_some(location.prefix.as_str());
        let rows = self
            .store
            .scan(&location.namespace, start, None, usize::MAX)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| {
                location
                    .relative(&key)
                    .map(|rel| (rel.to_string(), value))
            })
            .collect())
    }
}

#[async_trait]
impl StateStore for KvStateStore {
    async fn capture(&self, entry: &ScopeEntry) -> CheckpointResult<ScopeState> {
        let location = Location::resolve(entry)?;
        let mut state = ScopeState::for_entry(entry);
        state.items = self
            .current(&location)
            .await?
            .into_iter()
            .map(|(k, v)| (k, Blob(v)))
            .collect();
        debug!(entry = %entry, keys = state.items.len(), "captured kv scope");
        Ok(state)
    }

    async fn restore(&self, entry: &ScopeEntry, state: &ScopeState) -> CheckpointResult<()> {
        let location = Location::resolve(entry)?;
        let current = self.current(&location).await?;

        let mut writes = Vec::new();
        for key in current.keys().filter(|k| !state.items.contains_key(*k)) {
            writes.push(KvWrite::delete(
                location.namespace.as_str(),
                location.absolute(key),
            ));
        }
        for (key, blob) in &state.items {
            if current.get(key) != Some(&blob.0) {
                writes.push(KvWrite::set(
                    location.namespace.as_str(),
                    location.absolute(key),
                    blob.0.clone(),
                ));
            }
        }
        let changed = writes.len();
        if !writes.is_empty() {
            self.store.apply(writes).await?;
        }
        debug!(entry = %entry, changed, "restored kv scope");
        Ok(())
    }
}
