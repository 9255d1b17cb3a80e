//! Raw key-value store trait and implementations.
//!
//! The [`KvStore`] trait provides byte-level operations on namespaced keys.
//! Namespaces and keys are joined as `"{namespace}\0{key}"`, so neither may
//! contain a null byte.
//!
//! Use [`ScopedKvStore`] to pre-bind a namespace and get typed
//! [`get_json`](ScopedKvStore::get_json) / [`set_json`](ScopedKvStore::set_json)
//! helpers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.is_empty() {
        return Err(StorageError::InvalidKey(
            "namespace must not be empty".into(),
        ));
    }
    if namespace.contains('\0') {
        return Err(StorageError::InvalidKey(
            "namespace must not contain null bytes".into(),
        ));
    }
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

fn composite_key(namespace: &str, key: &str) -> String {
    format!("{namespace}\0{key}")
}

/// Inclusive start of a namespace's key range.
fn namespace_start(namespace: &str) -> String {
    format!("{namespace}\0")
}

/// Exclusive end of a namespace's key range. `\x01` sorts directly after the
/// `\0` separator, so the half-open range covers exactly the namespace.
fn namespace_end(namespace: &str) -> String {
    format!("{namespace}\u{1}")
}

/// Compute the composite `[start, end)` bounds of a scan.
fn scan_bounds(namespace: &str, start: Option<&str>, end: Option<&str>) -> (String, String) {
    let lo = start.map_or_else(|| namespace_start(namespace), |s| composite_key(namespace, s));
    let hi = end.map_or_else(|| namespace_end(namespace), |e| composite_key(namespace, e));
    (lo, hi)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One mutation in an atomic batch.
#[derive(Debug, Clone)]
pub enum KvWrite {
    /// Insert or overwrite a value.
    Set {
        /// Target namespace.
        namespace: String,
        /// Target key.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key if present.
    Delete {
        /// Target namespace.
        namespace: String,
        /// Target key.
        key: String,
    },
}

impl KvWrite {
    /// A set operation.
    #[must_use]
    pub fn set(namespace: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Set {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }

    /// A delete operation.
    #[must_use]
    pub fn delete(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    fn validate(&self) -> StorageResult<()> {
        match self {
            Self::Set { namespace, key, .. } | Self::Delete { namespace, key } => {
                validate_namespace(namespace)?;
                validate_key(key)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Raw key-value store trait.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value; `None` if the key does not exist.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Set a value, overwriting any existing one.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// List all keys in a namespace, in ascending byte order.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Return up to `limit` entries with `start <= key < end`, in ascending
    /// byte order. `None` bounds are open.
    async fn scan(
        &self,
        namespace: &str,
        start: Option<&str>,
        end: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Apply all writes atomically: either every write is visible or none is.
    async fn apply(&self, writes: Vec<KvWrite>) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory key-value store for tests and ephemeral data.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: std::sync::RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        Ok(self.read()?.get(&composite_key(namespace, key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        self.write()?.insert(composite_key(namespace, key), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        Ok(self.write()?.remove(&composite_key(namespace, key)).is_some())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_namespace(namespace)?;
        let prefix_len = namespace.len().saturating_add(1);
        let data = self.read()?;
        Ok(data
            .range(namespace_start(namespace)..namespace_end(namespace))
            .map(|(k, _)| k[prefix_len..].to_string())
            .collect())
    }

    async fn scan(
        &self,
        namespace: &str,
        start: Option<&str>,
        end: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        validate_namespace(namespace)?;
        let (lo, hi) = scan_bounds(namespace, start, end);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let prefix_len = namespace.len().saturating_add(1);
        let data = self.read()?;
        Ok(data
            .range(lo..hi)
            .take(limit)
            .map(|(k, v)| (k[prefix_len..].to_string(), v.clone()))
            .collect())
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> StorageResult<()> {
        for w in &writes {
            w.validate()?;
        }
        let mut data = self.write()?;
        for w in writes {
            match w {
                KvWrite::Set {
                    namespace,
                    key,
                    value,
                } => {
                    data.insert(composite_key(&namespace, &key), value);
                },
                KvWrite::Delete { namespace, key } => {
                    data.remove(&composite_key(&namespace, &key));
                },
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SurrealKV implementation (behind `kv` feature)
// ---------------------------------------------------------------------------

/// Persistent key-value store backed by `SurrealKV`.
///
/// ACID-compliant embedded LSM-tree storage; every operation runs in its own
/// transaction.
#[cfg(feature = "kv")]
pub struct SurrealKvStore {
    tree: surrealkv::Tree,
}

#[cfg(feature = "kv")]
impl std::fmt::Debug for SurrealKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvStore").finish_non_exhaustive()
    }
}

#[cfg(feature = "kv")]
impl SurrealKvStore {
    /// Open a store at the given directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the store cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        tracing::debug!(path = %path.as_ref().display(), "opened surrealkv store");
        Ok(Self { tree })
    }

    /// Close the store, flushing pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

#[cfg(feature = "kv")]
fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

#[cfg(feature = "kv")]
fn strip_namespace(raw: &[u8], prefix_len: usize) -> Option<String> {
    raw.get(prefix_len..)
        .and_then(|k| std::str::from_utf8(k).ok())
        .map(ToString::to_string)
}

/// Collect up to `$limit` composite keys in `[$lo, $hi)` from transaction `$tx`.
#[cfg(feature = "kv")]
macro_rules! collect_range_keys {
    ($tx:expr, $lo:expr, $hi:expr, $limit:expr) => {{
        let mut iter = $tx.range($lo, $hi).map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;
        let mut keys: Vec<Vec<u8>> = Vec::new();
        while iter.valid() && keys.len() < $limit {
            keys.push(iter.key().to_vec());
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        keys
    }};
}

#[cfg(feature = "kv")]
#[async_trait]
impl KvStore for SurrealKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let ck = composite_key(namespace, key).into_bytes();
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&ck).map_err(|ref e| map_kv_err(e))
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.apply(vec![KvWrite::set(namespace, key, value)]).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let ck = composite_key(namespace, key).into_bytes();
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let existed = tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some();
        if existed {
            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(existed)
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_namespace(namespace)?;
        let prefix_len = namespace.len().saturating_add(1);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let start = namespace_start(namespace).into_bytes();
        let end = namespace_end(namespace).into_bytes();
        let keys = collect_range_keys!(tx, &start, &end, usize::MAX);
        Ok(keys
            .iter()
            .filter_map(|raw| strip_namespace(raw, prefix_len))
            .collect())
    }

    async fn scan(
        &self,
        namespace: &str,
        start: Option<&str>,
        end: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        validate_namespace(namespace)?;
        let (lo, hi) = scan_bounds(namespace, start, end);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let prefix_len = namespace.len().saturating_add(1);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let (lo, hi) = (lo.into_bytes(), hi.into_bytes());
        let raw_keys = collect_range_keys!(tx, &lo, &hi, limit);

        let mut out = Vec::with_capacity(raw_keys.len());
        for raw in raw_keys {
            let Some(key) = strip_namespace(&raw, prefix_len) else {
                continue;
            };
            if let Some(value) = tx.get(&raw).map_err(|ref e| map_kv_err(e))? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> StorageResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        for w in &writes {
            w.validate()?;
        }
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for w in &writes {
            match w {
                KvWrite::Set {
                    namespace,
                    key,
                    value,
                } => {
                    let ck = composite_key(namespace, key).into_bytes();
                    tx.set(&ck, value).map_err(|ref e| map_kv_err(e))?;
                },
                KvWrite::Delete { namespace, key } => {
                    let ck = composite_key(namespace, key).into_bytes();
                    tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
                },
            }
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }
}

// ---------------------------------------------------------------------------
// Scoped store (namespace pre-bound)
// ---------------------------------------------------------------------------

/// A namespace-scoped view into a [`KvStore`] with JSON helpers.
#[derive(Clone)]
pub struct ScopedKvStore {
    inner: Arc<dyn KvStore>,
    namespace: String,
}

impl std::fmt::Debug for ScopedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKvStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ScopedKvStore {
    /// Create a scoped view for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the namespace is empty or
    /// contains null bytes.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            inner: store,
            namespace,
        })
    }

    /// The namespace this view is bound to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    /// Get raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store fails.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(&self.namespace, key).await
    }

    /// Set raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store fails.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.inner.set(&self.namespace, key, value).await
    }

    /// Delete a key; returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store fails.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(&self.namespace, key).await
    }

    /// List all keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.list_keys(&self.namespace).await
    }

    /// Deserialize a JSON value; `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if deserialization fails.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.get(key)
            .await?
            .map(|b| {
                serde_json::from_slice(&b).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// Serialize a value as JSON and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }

    /// Deserialize every value in the namespace, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if any value fails to parse.
    pub async fn all_json<T: serde::de::DeserializeOwned>(&self) -> StorageResult<Vec<(String, T)>> {
        let rows = self
            .inner
            .scan(&self.namespace, None, None, usize::MAX)
            .await?;
        rows.into_iter()
            .map(|(k, v)| {
                serde_json::from_slice(&v)
                    .map(|t| (k, t))
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn KvStore) {
        store.set("ns", "b", b"2".to_vec()).await.unwrap();
        store.set("ns", "a", b"1".to_vec()).await.unwrap();
        store.set("ns", "c", b"3".to_vec()).await.unwrap();
        store.set("other", "a", b"x".to_vec()).await.unwrap();

        assert_eq!(store.get("ns", "a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.list_keys("ns").await.unwrap(), vec!["a", "b", "c"]);

        let window = store.scan("ns", Some("b"), None, 10).await.unwrap();
        assert_eq!(
            window.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        let first = store.scan("ns", None, Some("c"), 1).await.unwrap();
        assert_eq!(first, vec![("a".to_string(), b"1".to_vec())]);

        store
            .apply(vec![
                KvWrite::delete("ns", "a"),
                KvWrite::set("ns", "d", b"4".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(store.list_keys("ns").await.unwrap(), vec!["b", "c", "d"]);
        assert!(store.delete("ns", "b").await.unwrap());
        assert!(!store.delete("ns", "b").await.unwrap());
        assert_eq!(store.list_keys("other").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_memory_store_semantics() {
        exercise(&MemoryKvStore::new()).await;
    }

    #[cfg(feature = "kv")]
    #[tokio::test]
    async fn test_surrealkv_store_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurrealKvStore::open(dir.path()).unwrap();
        exercise(&store).await;
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_null_bytes() {
        let store = MemoryKvStore::new();
        assert!(store.set("ns\0x", "k", vec![]).await.is_err());
        assert!(store.set("ns", "", vec![]).await.is_err());
        assert!(
            store
                .apply(vec![KvWrite::set("ns", "k\0", vec![])])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_scoped_json() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let scoped = ScopedKvStore::new(store, "caps:grants").unwrap();
        scoped.set_json("g1", &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<i32>> = scoped.get_json("g1").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        let all: Vec<(String, Vec<i32>)> = scoped.all_json().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
