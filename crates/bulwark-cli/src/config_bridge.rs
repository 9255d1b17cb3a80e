//! Bridge from `bulwark_config::Config` to domain types.
//!
//! The config crate depends on no other bulwark crate; every conversion
//! into policy, ceilings, boundaries and logging happens here, once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bulwark_approval::RiskPolicy;
use bulwark_capabilities::ResourceClass;
use bulwark_checkpoint::{CompositeStateStore, FsStateStore, KvStateStore};
use bulwark_config::{Config, Mode};
use bulwark_core::{DeploymentMode, ManifestCeilings, RiskLevel, retry::RetryConfig};
use bulwark_isolation::{ContainerBoundary, IsolationExecutor, IsolationPolicy};
use bulwark_storage::KvStore;
use bulwark_telemetry::{LogConfig, LogFormat};

/// Convert the config mode to the domain mode.
#[must_use]
pub(crate) fn to_deployment_mode(mode: Mode) -> DeploymentMode {
    match mode {
        Mode::Safe => DeploymentMode::Safe,
        Mode::Supervised => DeploymentMode::Supervised,
        Mode::Autonomous => DeploymentMode::Autonomous,
    }
}

fn risk_level(field: &str, value: u8) -> Result<RiskLevel> {
    RiskLevel::new(value).with_context(|| format!("{field}: risk level {value} is out of range"))
}

/// Convert config to [`RiskPolicy`]: the mode preset with explicit
/// overrides applied.
pub(crate) fn to_risk_policy(cfg: &Config) -> Result<RiskPolicy> {
    let policy = RiskPolicy::for_mode(to_deployment_mode(cfg.deployment.mode))
        .with_approval_threshold(risk_level("approval.threshold", cfg.approval_threshold())?)
        .with_checkpoint_floor(risk_level("checkpoint.floor", cfg.checkpoint_floor())?)
        .with_approval_timeout(Duration::from_secs(cfg.approval_timeout_secs()));
    policy.validate()?;
    Ok(policy)
}

/// Convert `[limits]` to [`ManifestCeilings`].
#[must_use]
pub(crate) fn to_manifest_ceilings(cfg: &Config) -> ManifestCeilings {
    ManifestCeilings {
        max_timeout_secs: cfg.limits.max_timeout_secs,
        max_memory_mb: cfg.limits.max_memory_mb,
        max_cpu_secs: cfg.limits.max_cpu_secs,
    }
}

/// Build the [`IsolationExecutor`] described by `[isolation]`.
pub(crate) fn to_isolation_executor(cfg: &Config) -> Result<IsolationExecutor> {
    let iso = &cfg.isolation;
    let mut policy = IsolationPolicy::default();
    if let Some(risk) = iso.container_at_risk {
        policy = policy.with_container_at_risk(risk_level("isolation.container_at_risk", risk)?);
    }

    let retry = RetryConfig {
        max_retries: iso.spawn_attempts.saturating_sub(1),
        ..RetryConfig::spawn()
    };
    let executor = IsolationExecutor::new(policy)
        .with_spawn_retry(retry)
        .with_spawn_timeout(Duration::from_secs(iso.spawn_timeout_secs));

    Ok(match &iso.container_runtime {
        Some(runtime) => executor.with_boundary(Arc::new(ContainerBoundary::new(runtime))),
        None => executor,
    })
}

/// State backends for checkpoint scopes: `kv:` over `store`, `fs:` over
/// the host filesystem.
#[must_use]
pub(crate) fn to_state_store(cfg: &Config, store: Arc<dyn KvStore>) -> CompositeStateStore {
    CompositeStateStore::new()
        .with(ResourceClass::Kv, Arc::new(KvStateStore::new(store)))
        .with(
            ResourceClass::Fs,
            Arc::new(FsStateStore::new("/").with_max_snapshot_bytes(cfg.checkpoint.max_snapshot_bytes)),
        )
}

/// Scope lock wait.
#[must_use]
pub(crate) fn to_lock_timeout(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.checkpoint.lock_timeout_secs)
}

/// Convert `[logging]` to [`LogConfig`].
#[must_use]
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let format = cfg.logging.format.parse().unwrap_or(LogFormat::Pretty);
    LogConfig::new(&cfg.logging.level).with_format(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_agree_with_policy() {
        for mode in [Mode::Safe, Mode::Supervised, Mode::Autonomous] {
            let preset = mode.preset();
            let policy = RiskPolicy::for_mode(to_deployment_mode(mode));
            assert_eq!(policy.approval_threshold.get(), preset.approval_threshold);
            assert_eq!(policy.checkpoint_floor.get(), preset.checkpoint_floor);
            assert_eq!(
                policy.approval_timeout,
                Duration::from_secs(preset.approval_timeout_secs)
            );
        }
    }

    #[test]
    fn test_explicit_values_override_mode() {
        let mut cfg = Config::default();
        cfg.deployment.mode = Mode::Autonomous;
        cfg.approval.threshold = Some(2);
        cfg.approval.timeout_secs = Some(30);

        let policy = to_risk_policy(&cfg).unwrap();
        assert_eq!(policy.approval_threshold.get(), 2);
        assert_eq!(policy.checkpoint_floor.get(), 4);
        assert_eq!(policy.approval_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_ceilings_from_limits() {
        let mut cfg = Config::default();
        cfg.limits.max_memory_mb = 1024;
        let ceilings = to_manifest_ceilings(&cfg);
        assert_eq!(ceilings.max_memory_mb, 1024);
        assert_eq!(ceilings.max_timeout_secs, 3600);
    }

    #[test]
    fn test_log_config() {
        let mut cfg = Config::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
    }
}
