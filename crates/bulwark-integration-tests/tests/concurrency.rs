//! Scope locking across concurrent actions, and shutdown while actions wait.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bulwark_approval::RiskPolicy;
use bulwark_core::{DeploymentMode, RiskLevel};
use bulwark_guard::{ActionRequest, ErrorKind, SHUTDOWN_REASON};
use bulwark_isolation::{ActionBody, InlineAction};
use bulwark_storage::KvStore;
use common::{Echo, Harness, manifest};
use serde_json::Value;
use tokio::sync::{Barrier, Notify};

/// Checkpoints from risk 4, approval only at 5.
fn unattended() -> RiskPolicy {
    RiskPolicy::for_mode(DeploymentMode::Supervised)
        .with_approval_threshold(RiskLevel::new(5).unwrap())
}

/// Tracks how many instances run at once.
struct Occupy {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl InlineAction for Occupy {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

/// Succeeds only if a partner reaches the barrier too.
struct Rendezvous(Arc<Barrier>);

#[async_trait]
impl InlineAction for Rendezvous {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        tokio::time::timeout(Duration::from_secs(5), self.0.wait())
            .await
            .map(|_| Value::Null)
            .map_err(|_| "partner never arrived".to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_scopes_run_one_at_a_time() {
    let h = Harness::with_policy(unattended()).await;
    h.grant("fs:write:/workspace/**").await;
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = ["fs:write:/workspace/**", "fs:write:/workspace/out/**"]
        .into_iter()
        .map(|cap| {
            h.guard.spawn(ActionRequest::new(
                h.agent.clone(),
                manifest(4, &[cap]),
                ActionBody::inline(Occupy {
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                }),
            ))
        })
        .collect();

    for handle in handles {
        let result = handle.join().await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.metrics.checkpoint_id.is_some());
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(h.guard.services().checkpoints.locks().held().is_empty());
    h.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disjoint_scopes_run_together() {
    let h = Harness::with_policy(unattended()).await;
    h.grant("fs:write:/workspace/**").await;
    h.grant("kv:set:/app/**").await;
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["fs:write:/workspace/**", "kv:set:/app/**"]
        .into_iter()
        .map(|cap| {
            h.guard.spawn(ActionRequest::new(
                h.agent.clone(),
                manifest(4, &[cap]),
                ActionBody::inline(Rendezvous(Arc::clone(&barrier))),
            ))
        })
        .collect();

    for handle in handles {
        let result = handle.join().await;
        assert!(result.success, "{:?}", result.error);
    }
    h.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unchecked_writers_still_take_the_scope() {
    let h = Harness::with_policy(unattended()).await;
    h.grant("fs:write:/workspace/**").await;
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            h.guard.spawn(ActionRequest::new(
                h.agent.clone(),
                manifest(2, &["fs:write:/workspace/**"]),
                ActionBody::inline(Occupy {
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                }),
            ))
        })
        .collect();

    for handle in handles {
        let result = handle.join().await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metrics.checkpoint_id, None);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(h.guard.services().checkpoints.locks().held().is_empty());
    h.close().await;
}

/// Writes `state:app/mode`.
struct SetMode {
    kv: Arc<dyn KvStore>,
    value: &'static str,
}

#[async_trait]
impl InlineAction for SetMode {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        self.kv
            .set("state:app", "mode", self.value.as_bytes().to_vec())
            .await
            .map(|()| Value::Null)
            .map_err(|e| e.to_string())
    }
}

/// Writes `state:app/mode`, then fails once released.
struct BreakAndFail {
    kv: Arc<dyn KvStore>,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl InlineAction for BreakAndFail {
    async fn run(&self, _input: Value) -> Result<Value, String> {
        self.kv
            .set("state:app", "mode", b"broken".to_vec())
            .await
            .map_err(|e| e.to_string())?;
        self.started.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.release.notified()).await;
        Err("gave up".to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_low_risk_write_waits_for_rollback() {
    let h = Harness::with_policy(unattended()).await;
    h.grant("kv:set:/app/**").await;
    h.kv.set("state:app", "mode", b"stable".to_vec()).await.unwrap();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let risky = h.guard.spawn(ActionRequest::new(
        h.agent.clone(),
        manifest(4, &["kv:set:/app/**"]),
        ActionBody::inline(BreakAndFail {
            kv: Arc::clone(&h.kv),
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
    ));
    started.notified().await;

    let minor = h.guard.spawn(ActionRequest::new(
        h.agent.clone(),
        manifest(1, &["kv:set:/app/**"]),
        ActionBody::inline(SetMode {
            kv: Arc::clone(&h.kv),
            value: "minor",
        }),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.kv.get("state:app", "mode").await.unwrap(),
        Some(b"broken".to_vec())
    );

    release.notify_one();
    let risky = risky.join().await;
    assert!(!risky.success);
    assert!(risky.metrics.rolled_back);

    let minor = minor.join().await;
    assert!(minor.success, "{:?}", minor.error);
    assert_eq!(
        h.kv.get("state:app", "mode").await.unwrap(),
        Some(b"minor".to_vec())
    );
    h.close().await;
}

#[tokio::test]
async fn test_shutdown_denies_waiting_actions() {
    let h = Harness::new().await;
    h.grant("fs:write:/workspace/**").await;

    let mut requests = h.guard.approvals().subscribe();
    let waiting = h.guard.spawn(ActionRequest::new(
        h.agent.clone(),
        manifest(4, &["fs:write:/workspace/**"]),
        ActionBody::inline(Echo),
    ));
    let pending = requests.recv().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.guard.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert!(!h.guard.is_accepting());

    let result = waiting.join().await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Approval));
    assert!(
        result.error.as_ref().unwrap().detail.contains(SHUTDOWN_REASON),
        "{:?}",
        result.error
    );
    assert_eq!(result.metrics.boundary, None);
    let archived = h.guard.approvals().find(pending.id).await.unwrap().unwrap();
    assert_eq!(
        archived.resolution.unwrap().reason.as_deref(),
        Some(SHUTDOWN_REASON)
    );

    let late = h
        .guard
        .execute(ActionRequest::new(
            h.agent.clone(),
            manifest(1, &["fs:write:/workspace/**"]),
            ActionBody::inline(Echo),
        ))
        .await;
    assert_eq!(late.error_kind(), Some(ErrorKind::Cancelled));
    assert!(h.events(late.correlation_id).await.is_empty());
    h.close().await;
}
