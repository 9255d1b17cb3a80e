//! Shared harness for integration tests.
//!
//! Wires the guard to persistent services the way a deployment does: a
//! SurrealKV store for grants, the audit chain, approvals, checkpoints and
//! `kv:` state, and a filesystem state store rooted in a temp directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_approval::{ApprovalGate, RiskPolicy};
use bulwark_audit::AuditLog;
use bulwark_capabilities::{Capability, CapabilityRegistry, ResourceClass};
use bulwark_checkpoint::{CheckpointStore, CompositeStateStore, FsStateStore, KvStateStore};
use bulwark_clock::ClockService;
use bulwark_core::{
    ActionManifest, CorrelationId, DeploymentMode, ManifestCeilings, NodeId, PrincipalId,
    TrustLevel,
};
use bulwark_crypto::KeyPair;
use bulwark_guard::{ExecutionGuard, GuardServices};
use bulwark_isolation::{InlineAction, IsolationExecutor, IsolationPolicy};
use bulwark_storage::{KvStore, SurrealKvStore};
use serde_json::{Value, json};
use tempfile::TempDir;

/// A guard over persistent services in a temp directory.
pub struct Harness {
    pub guard: ExecutionGuard,
    pub kv: Arc<dyn KvStore>,
    pub store: Arc<SurrealKvStore>,
    pub agent: PrincipalId,
    dir: TempDir,
}

impl Harness {
    /// Supervised mode, containers disabled.
    pub async fn new() -> Self {
        Self::with_policy(RiskPolicy::for_mode(DeploymentMode::Supervised)).await
    }

    pub async fn with_policy(policy: RiskPolicy) -> Self {
        let dir = TempDir::new().expect("failed to create tempdir");
        std::fs::create_dir_all(dir.path().join("root")).expect("failed to create fs root");
        Self::open(dir, policy, KeyPair::generate()).await
    }

    /// Open services over an existing directory.
    pub async fn open(dir: TempDir, policy: RiskPolicy, key: KeyPair) -> Self {
        let store = Arc::new(
            SurrealKvStore::open(dir.path().join("store")).expect("failed to open store"),
        );
        let kv: Arc<dyn KvStore> = Arc::clone(&store) as Arc<dyn KvStore>;
        let clock = Arc::new(ClockService::system(NodeId::new("it")));

        let registry = CapabilityRegistry::with_store(Arc::clone(&clock), Arc::clone(&kv));
        registry.load().await.expect("failed to load grants");
        let audit = AuditLog::open(Arc::clone(&kv), Arc::clone(&clock), key)
            .await
            .expect("failed to open audit log");
        let approvals = ApprovalGate::new(policy, Arc::clone(&clock))
            .with_archive(Arc::clone(&kv))
            .expect("failed to attach archive");
        let states = CompositeStateStore::new()
            .with(ResourceClass::Kv, Arc::new(KvStateStore::new(Arc::clone(&kv))))
            .with(
                ResourceClass::Fs,
                Arc::new(FsStateStore::new(dir.path().join("root"))),
            );
        let checkpoints = CheckpointStore::new(Arc::clone(&clock), Arc::new(states))
            .with_lock_timeout(Duration::from_secs(5))
            .with_store(Arc::clone(&kv))
            .expect("failed to attach checkpoint store");

        let services = GuardServices {
            registry: Arc::new(registry),
            audit: Arc::new(audit),
            approvals: Arc::new(approvals),
            checkpoints: Arc::new(checkpoints),
            executor: Arc::new(IsolationExecutor::new(IsolationPolicy::default()).without_container()),
            clock,
        };

        Self {
            guard: ExecutionGuard::new(services, ManifestCeilings::default()),
            kv,
            store,
            agent: PrincipalId::new("agent-7"),
            dir,
        }
    }

    /// Shut the guard down and close the store, handing back the directory.
    pub async fn close(self) -> TempDir {
        self.guard.shutdown().await.expect("shutdown failed");
        let Self { guard, kv, store, dir, .. } = self;
        drop(guard);
        drop(kv);
        store.close().await.expect("failed to close store");
        dir
    }

    /// Where `fs:` scopes live: `fs:/a/b` is `{fs_root}/a/b`.
    pub fn fs_root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub fn fs_path(&self, rel: &str) -> PathBuf {
        self.fs_root().join(rel)
    }

    pub async fn grant(&self, pattern: &str) {
        self.guard
            .services()
            .registry
            .grant(&self.agent, Capability::parse(pattern).expect("bad pattern"), None, "test")
            .await
            .expect("grant failed");
    }

    /// Audit event names for one action, in order.
    pub async fn events(&self, correlation_id: CorrelationId) -> Vec<&'static str> {
        self.guard
            .audit()
            .entries_for_correlation(correlation_id)
            .await
            .expect("audit read failed")
            .iter()
            .map(|e| e.event.name())
            .collect()
    }
}

/// A builtin-trust manifest with the given risk and capabilities.
pub fn manifest(risk: u8, caps: &[&str]) -> ActionManifest {
    caps.iter()
        .fold(ActionManifest::builder("task"), |b, c| b.capability(*c))
        .risk_level(risk)
        .trust_level(TrustLevel::Builtin)
        .build()
}

/// Returns `{"echo": input}`.
pub struct Echo;

#[async_trait]
impl InlineAction for Echo {
    async fn run(&self, input: Value) -> Result<Value, String> {
        Ok(json!({ "echo": input }))
    }
}

/// Overwrites one file, creates another, then fails.
pub struct ScribbleThenFail {
    pub dir: PathBuf,
}

#[async_trait]
impl InlineAction for ScribbleThenFail {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        std::fs::write(self.dir.join("report.txt"), b"half-written").map_err(|e| e.to_string())?;
        std::fs::write(self.dir.join("stray.tmp"), b"junk").map_err(|e| e.to_string())?;
        Err("crashed mid-write".to_string())
    }
}

/// Sleeps far past any test deadline.
pub struct Stall;

#[async_trait]
impl InlineAction for Stall {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir failed");
    }
    std::fs::write(path, contents).expect("write failed");
}
