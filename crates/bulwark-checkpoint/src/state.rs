//! Captured state and the backends that capture and restore it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bulwark_capabilities::ResourceClass;
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, CheckpointResult};
use crate::scope::ScopeEntry;

/// Opaque bytes, serialized as base64.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Blob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// The captured contents of one scope entry.
///
/// `items` maps a key relative to the entry to its bytes; the empty key
/// stands for the entry itself. `containers` lists relative keys that
/// existed as directories (filesystem only; the empty key means the entry
/// itself was a directory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeState {
    /// The entry this state belongs to.
    pub entry: ScopeEntry,
    /// Captured values by relative key.
    pub items: BTreeMap<String, Blob>,
    /// Relative keys that were directories.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub containers: BTreeSet<String>,
}

impl ScopeState {
    /// An empty state for `entry`.
    #[must_use]
    pub fn for_entry(entry: &ScopeEntry) -> Self {
        Self {
            entry: entry.clone(),
            items: BTreeMap::new(),
            containers: BTreeSet::new(),
        }
    }

    /// Total captured bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.items
            .values()
            .fold(0_u64, |acc, b| acc.saturating_add(b.len() as u64))
    }
}

/// A full snapshot: one [`ScopeState`] per scope entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Per-entry states in scope order.
    pub states: Vec<ScopeState>,
}

impl StateSnapshot {
    /// Total captured bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.states
            .iter()
            .fold(0_u64, |acc, s| acc.saturating_add(s.byte_len()))
    }
}

/// A backend that can capture and restore mutable state under a scope
/// entry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Capture everything under `entry`.
    async fn capture(&self, entry: &ScopeEntry) -> CheckpointResult<ScopeState>;

    /// Replace everything under `entry` with `state`.
    ///
    /// Keys present now but absent from `state` are removed. Restoring the
    /// same state twice leaves the same result as restoring it once.
    async fn restore(&self, entry: &ScopeEntry, state: &ScopeState) -> CheckpointResult<()>;
}

/// Dispatches scope entries to a backend by resource class.
#[derive(Default, Clone)]
pub struct CompositeStateStore {
    backends: HashMap<ResourceClass, Arc<dyn StateStore>>,
}

impl fmt::Debug for CompositeStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&ResourceClass> = self.backends.keys().collect();
        classes.sort();
        f.debug_struct("CompositeStateStore")
            .field("classes", &classes)
            .finish()
    }
}

impl CompositeStateStore {
    /// A store with no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `class` to `backend`.
    #[must_use]
    pub fn with(mut self, class: ResourceClass, backend: Arc<dyn StateStore>) -> Self {
        self.backends.insert(class, backend);
        self
    }

    fn backend(&self, class: ResourceClass) -> CheckpointResult<&Arc<dyn StateStore>> {
        self.backends
            .get(&class)
            .ok_or(CheckpointError::Unsupported { class })
    }
}

#[async_trait]
impl StateStore for CompositeStateStore {
    async fn capture(&self, entry: &ScopeEntry) -> CheckpointResult<ScopeState> {
        self.backend(entry.class)?.capture(entry).await
    }

    async fn restore(&self, entry: &ScopeEntry, state: &ScopeState) -> CheckpointResult<()> {
        self.backend(entry.class)?.restore(entry, state).await
    }
}
