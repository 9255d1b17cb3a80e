//! A store whose writes to one namespace can be made to fail.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bulwark_storage::{KvStore, KvWrite, MemoryKvStore, StorageError, StorageResult};

/// Lets `budget` writes into `namespace` through, then fails the rest.
pub(crate) struct FlakyStore {
    inner: MemoryKvStore,
    namespace: &'static str,
    budget: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(namespace: &'static str, budget: usize) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            namespace,
            budget: AtomicUsize::new(budget),
        }
    }

    /// Fail every further write into the namespace.
    pub(crate) fn break_now(&self) {
        self.budget.store(0, Ordering::SeqCst);
    }

    fn admit(&self, namespace: &str) -> StorageResult<()> {
        if namespace != self.namespace {
            return Ok(());
        }
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| StorageError::Internal(format!("{} is read-only", self.namespace)))
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.admit(namespace)?;
        self.inner.set(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        self.admit(namespace)?;
        self.inner.delete(namespace, key).await
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        self.inner.list_keys(namespace).await
    }

    async fn scan(
        &self,
        namespace: &str,
        start: Option<&str>,
        end: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan(namespace, start, end, limit).await
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> StorageResult<()> {
        let touches = writes.iter().any(|w| match w {
            KvWrite::Set { namespace, .. } | KvWrite::Delete { namespace, .. } => {
                namespace == self.namespace
            },
        });
        if touches {
            self.admit(self.namespace)?;
        }
        self.inner.apply(writes).await
    }
}
