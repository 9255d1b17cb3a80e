//! Opens the persistent services under the data directory.
//!
//! Layout of `{data_dir}`:
//! - `keys/runtime.key`: Ed25519 key signing audit entries (0600)
//! - `store/`: SurrealKV tree holding grants, the audit chain, approval
//!   archive, checkpoints and `kv:` action state

use std::sync::Arc;

use anyhow::{Context, Result};
use bulwark_approval::ApprovalGate;
use bulwark_audit::AuditLog;
use bulwark_capabilities::CapabilityRegistry;
use bulwark_checkpoint::CheckpointStore;
use bulwark_clock::ClockService;
use bulwark_config::Config;
use bulwark_core::NodeId;
use bulwark_crypto::KeyPair;
use bulwark_guard::{CapabilityAdmin, ExecutionGuard, GuardServices};
use bulwark_storage::{KvStore, SurrealKvStore};
use tracing::debug;

use crate::config_bridge;

/// Persistent services for one CLI invocation.
pub(crate) struct Runtime {
    config: Config,
    store: Arc<SurrealKvStore>,
    services: GuardServices,
}

impl Runtime {
    /// Open (or create) the data directory named by `config`.
    pub(crate) async fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let key_path = data_dir.join("keys").join("runtime.key");
        let runtime_key = KeyPair::load_or_generate(&key_path)
            .with_context(|| format!("failed to load runtime key {}", key_path.display()))?;

        let store = Arc::new(
            SurrealKvStore::open(data_dir.join("store")).context("failed to open the store")?,
        );
        let kv: Arc<dyn KvStore> = Arc::clone(&store) as Arc<dyn KvStore>;

        let clock = Arc::new(ClockService::system(NodeId::new(&config.clock.node_id)));

        let registry = CapabilityRegistry::with_store(Arc::clone(&clock), Arc::clone(&kv));
        let grants = registry.load().await.context("failed to load grants")?;
        debug!(grants, "loaded capability grants");

        let audit = AuditLog::open(Arc::clone(&kv), Arc::clone(&clock), runtime_key)
            .await
            .context("failed to open the audit log")?;

        let approvals = ApprovalGate::new(config_bridge::to_risk_policy(config)?, Arc::clone(&clock))
            .with_archive(Arc::clone(&kv))?;

        let states = config_bridge::to_state_store(config, Arc::clone(&kv));
        let checkpoints = CheckpointStore::new(Arc::clone(&clock), Arc::new(states))
            .with_lock_timeout(config_bridge::to_lock_timeout(config))
            .with_store(Arc::clone(&kv))?;

        let services = GuardServices {
            registry: Arc::new(registry),
            audit: Arc::new(audit),
            approvals: Arc::new(approvals),
            checkpoints: Arc::new(checkpoints),
            executor: Arc::new(config_bridge::to_isolation_executor(config)?),
            clock,
        };

        debug!(data_dir = %data_dir.display(), "runtime opened");
        Ok(Self {
            config: config.clone(),
            store,
            services,
        })
    }

    pub(crate) fn services(&self) -> &GuardServices {
        &self.services
    }

    pub(crate) fn admin(&self) -> CapabilityAdmin {
        CapabilityAdmin::new(
            Arc::clone(&self.services.registry),
            Arc::clone(&self.services.audit),
        )
    }

    pub(crate) fn guard(&self) -> ExecutionGuard {
        ExecutionGuard::new(
            self.services.clone(),
            config_bridge::to_manifest_ceilings(&self.config),
        )
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Flush and close the store.
    pub(crate) async fn close(self) -> Result<()> {
        drop(self.services);
        self.store.close().await.context("failed to close the store")
    }
}
