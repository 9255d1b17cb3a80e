//! The approval gate.
//!
//! Each pending request owns a slot: a per-request mutex over the request
//! and a `watch` channel carrying its status. Waiters suspend on the
//! channel; approvers and the timeout race to mutate the slot, and only
//! the first transition out of `Pending` sticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bulwark_clock::ClockService;
use bulwark_core::{RequestId, Timestamp};
use bulwark_storage::{KvStore, ScopedKvStore};
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{ApprovalError, ApprovalResult};
use crate::policy::RiskPolicy;
use crate::request::{
    ApprovalRequest, ApprovalStatus, ApprovalSubmission, Resolution, sanitize_state,
};

// -- Namespace constants --

const NS_ARCHIVE: &str = "approval:archive";

/// Approver name recorded for timeouts, cancellation and shutdown.
pub const SYSTEM_APPROVER: &str = "system";

/// Reason recorded when a caller cancels a pending request.
pub const CANCELLED_REASON: &str = "cancelled";

const NOTIFY_CAPACITY: usize = 64;

/// Outcome of submitting an action to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Below the approval threshold; no request was created.
    AutoApproved,
    /// A request was created and awaits a decision.
    Pending(ApprovalRequest),
}

struct Slot {
    request: Mutex<ApprovalRequest>,
    status: watch::Sender<ApprovalStatus>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, ApprovalRequest> {
        // The request is plain data; a panicked holder cannot leave it
        // half-written across a status transition.
        self.request.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> ApprovalRequest {
        self.lock().clone()
    }
}

enum Transition {
    Applied(ApprovalRequest),
    ExpiredFirst(ApprovalRequest),
}

/// Routes risky actions to a human and suspends them until resolved.
pub struct ApprovalGate {
    policy: RiskPolicy,
    clock: Arc<ClockService>,
    slots: DashMap<RequestId, Arc<Slot>>,
    notify: broadcast::Sender<ApprovalRequest>,
    archive: Option<ScopedKvStore>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("policy", &self.policy)
            .field("requests", &self.slots.len())
            .field("archived", &self.archive.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ApprovalGate {
    /// Create a gate with no archive.
    #[must_use]
    pub fn new(policy: RiskPolicy, clock: Arc<ClockService>) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            policy,
            clock,
            slots: DashMap::new(),
            notify,
            archive: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Archive resolved requests to `store`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the archive namespace is rejected.
    pub fn with_archive(mut self, store: Arc<dyn KvStore>) -> ApprovalResult<Self> {
        self.archive = Some(ScopedKvStore::new(store, NS_ARCHIVE)?);
        Ok(self)
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Submit an action for a decision.
    ///
    /// Below the approval threshold this resolves synchronously to
    /// [`Admission::AutoApproved`]. Otherwise a pending request is created
    /// and broadcast to subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Closed`] after [`close`](Self::close).
    pub fn submit(&self, submission: ApprovalSubmission) -> ApprovalResult<Admission> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ApprovalError::Closed);
        }
        if !self.policy.requires_approval(submission.risk_level) {
            debug!(
                action_id = %submission.action_id,
                risk = submission.risk_level.get(),
                "auto-approved below threshold"
            );
            return Ok(Admission::AutoApproved);
        }

        let now = self.clock.now();
        let request = ApprovalRequest {
            id: RequestId::new(),
            action_id: submission.action_id,
            principal: submission.principal,
            risk_level: submission.risk_level,
            summary: submission.summary,
            state_snapshot: sanitize_state(&submission.state),
            requested_at: now,
            timeout_at: now.saturating_add(self.policy.approval_timeout),
            status: ApprovalStatus::Pending,
            resolution: None,
        };
        let (status, _) = watch::channel(ApprovalStatus::Pending);
        self.slots.insert(
            request.id,
            Arc::new(Slot {
                request: Mutex::new(request.clone()),
                status,
            }),
        );

        info!(
            request_id = %request.id,
            action_id = %request.action_id,
            principal = %request.principal,
            risk = request.risk_level.get(),
            timeout_at = %request.timeout_at.0,
            "approval requested"
        );
        if self.notify.send(request.clone()).is_err() {
            debug!(request_id = %request.id, "no approvers subscribed");
        }
        Ok(Admission::Pending(request))
    }

    /// Suspend until the request is resolved or its window elapses.
    ///
    /// Returns the request in its terminal state. On timeout the request
    /// becomes [`ApprovalStatus::Expired`] unless a decision landed first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown id, or a storage
    /// error if archiving the expiry fails.
    pub async fn wait(&self, id: RequestId) -> ApprovalResult<ApprovalRequest> {
        let slot = self.slot(id).await?;
        let timeout_at = slot.snapshot().timeout_at;
        let mut rx = slot.status.subscribe();
        let remaining = timeout_at.duration_since(self.clock.now());

        let decided = tokio::time::timeout(remaining, rx.wait_for(|s| s.is_terminal()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        if !decided {
            match self
                .resolve(
                    id,
                    ApprovalStatus::Expired,
                    SYSTEM_APPROVER,
                    Some("approval window elapsed".to_string()),
                )
                .await
            {
                Ok(_) | Err(ApprovalError::AlreadyResolved { .. }) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(slot.snapshot())
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::AlreadyResolved`] if the request already
    /// reached a terminal state (including expiry that raced this call),
    /// or [`ApprovalError::NotFound`].
    pub async fn approve(
        &self,
        id: RequestId,
        by: &str,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::Approved, by, reason).await
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Same as [`approve`](Self::approve).
    pub async fn deny(
        &self,
        id: RequestId,
        by: &str,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::Denied, by, reason).await
    }

    /// Cancel a pending request. It resolves as denied with reason
    /// `cancelled`.
    ///
    /// # Errors
    ///
    /// Same as [`approve`](Self::approve).
    pub async fn cancel(&self, id: RequestId) -> ApprovalResult<ApprovalRequest> {
        self.resolve(
            id,
            ApprovalStatus::Denied,
            SYSTEM_APPROVER,
            Some(CANCELLED_REASON.to_string()),
        )
        .await
    }

    async fn resolve(
        &self,
        id: RequestId,
        status: ApprovalStatus,
        by: &str,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let slot = self.slot(id).await?;
        let transition = {
            let mut request = slot.lock();
            if request.status.is_terminal() {
                return Err(ApprovalError::AlreadyResolved {
                    request_id: id.to_string(),
                    status: request.status,
                });
            }
            let now = self.clock.now();
            if status != ApprovalStatus::Expired && now >= request.timeout_at {
                apply(&mut request, ApprovalStatus::Expired, SYSTEM_APPROVER, None, now);
                slot.status.send_replace(ApprovalStatus::Expired);
                Transition::ExpiredFirst(request.clone())
            } else {
                apply(&mut request, status, by, reason, now);
                slot.status.send_replace(status);
                Transition::Applied(request.clone())
            }
        };

        match transition {
            Transition::Applied(request) => {
                info!(
                    request_id = %id,
                    status = %request.status,
                    by,
                    "approval resolved"
                );
                self.archive(&request).await?;
                Ok(request)
            },
            Transition::ExpiredFirst(request) => {
                warn!(request_id = %id, attempted = %status, "decision arrived after expiry");
                self.archive(&request).await?;
                Err(ApprovalError::AlreadyResolved {
                    request_id: id.to_string(),
                    status: ApprovalStatus::Expired,
                })
            },
        }
    }

    async fn slot(&self, id: RequestId) -> ApprovalResult<Arc<Slot>> {
        if let Some(slot) = self.slots.get(&id) {
            return Ok(Arc::clone(slot.value()));
        }
        // Purged from memory; the archive still answers conflicts.
        if let Some(archive) = &self.archive
            && let Some(request) = archive
                .get_json::<ApprovalRequest>(&id.0.to_string())
                .await?
        {
            return Err(ApprovalError::AlreadyResolved {
                request_id: id.to_string(),
                status: request.status,
            });
        }
        Err(ApprovalError::NotFound {
            request_id: id.to_string(),
        })
    }

    async fn archive(&self, request: &ApprovalRequest) -> ApprovalResult<()> {
        if let Some(archive) = &self.archive {
            archive.set_json(&request.id.0.to_string(), request).await?;
        }
        Ok(())
    }

    /// Current state of a request held in memory.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<ApprovalRequest> {
        self.slots.get(&id).map(|slot| slot.snapshot())
    }

    /// Look up a request, falling back to the archive.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the archive read fails.
    pub async fn find(&self, id: RequestId) -> ApprovalResult<Option<ApprovalRequest>> {
        if let Some(request) = self.get(id) {
            return Ok(Some(request));
        }
        match &self.archive {
            Some(archive) => Ok(archive.get_json(&id.0.to_string()).await?),
            None => Ok(None),
        }
    }

    /// Pending requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|r| r.status == ApprovalStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.requested_at);
        pending
    }

    /// Requests held in memory, pending or not yet released.
    #[must_use]
    pub fn held(&self) -> usize {
        self.slots.len()
    }

    /// Receive each new pending request as it is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.notify.subscribe()
    }

    /// Drop a resolved request from memory once its outcome has been
    /// consumed. A pending request is kept. With an archive attached, later
    /// decisions on `id` are still answered as conflicts.
    pub fn release(&self, id: RequestId) -> Option<ApprovalRequest> {
        self.slots
            .remove_if(&id, |_, slot| slot.status.borrow().is_terminal())
            .map(|(_, slot)| slot.snapshot())
    }

    /// Drop resolved requests from memory. Returns how many were dropped.
    ///
    /// Without an archive, a later decision on a purged id reports
    /// [`ApprovalError::NotFound`] rather than a conflict.
    pub fn purge_resolved(&self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| !slot.status.borrow().is_terminal());
        before.saturating_sub(self.slots.len())
    }

    /// Stop accepting submissions. Pending requests are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        info!("approval gate closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deny every pending request with `reason`. Returns the requests
    /// this call resolved.
    ///
    /// # Errors
    ///
    /// Returns a storage error if archiving fails.
    pub async fn deny_all_pending(&self, reason: &str) -> ApprovalResult<Vec<ApprovalRequest>> {
        let ids: Vec<RequestId> = self.pending().into_iter().map(|r| r.id).collect();
        let mut denied = Vec::with_capacity(ids.len());
        for id in ids {
            match self
                .resolve(id, ApprovalStatus::Denied, SYSTEM_APPROVER, Some(reason.to_string()))
                .await
            {
                Ok(request) => denied.push(request),
                Err(ApprovalError::AlreadyResolved { .. }) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(denied)
    }
}

fn apply(
    request: &mut ApprovalRequest,
    status: ApprovalStatus,
    by: &str,
    reason: Option<String>,
    at: Timestamp,
) {
    request.status = status;
    request.resolution = Some(Resolution {
        by: by.to_string(),
        reason,
        at,
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_clock::ManualTimeSource;
    use bulwark_core::{ActionId, NodeId, PrincipalId, RiskLevel};
    use bulwark_storage::MemoryKvStore;
    use serde_json::json;

    use super::*;

    fn manual_clock() -> (Arc<ManualTimeSource>, Arc<ClockService>) {
        let source = Arc::new(ManualTimeSource::new(Timestamp::now()));
        let clock = Arc::new(ClockService::new(
            NodeId::new("test"),
            Arc::clone(&source) as Arc<dyn bulwark_clock::TimeSource>,
        ));
        (source, clock)
    }

    fn submission(risk: u8) -> ApprovalSubmission {
        ApprovalSubmission {
            action_id: ActionId::new(),
            principal: PrincipalId::new("agent"),
            risk_level: RiskLevel::new(risk).unwrap(),
            summary: "delete build cache".into(),
            state: json!({ "path": "/tmp/cache", "token": "abc" }),
        }
    }

    fn pending(gate: &ApprovalGate, risk: u8) -> ApprovalRequest {
        match gate.submit(submission(risk)).unwrap() {
            Admission::Pending(r) => r,
            Admission::AutoApproved => panic!("expected a pending request"),
        }
    }

    #[tokio::test]
    async fn test_below_threshold_auto_approves() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        assert_eq!(gate.submit(submission(2)).unwrap(), Admission::AutoApproved);
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_is_sanitized() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let request = pending(&gate, 5);
        assert_eq!(request.state_snapshot["token"], crate::request::REDACTED);
        assert_eq!(request.state_snapshot["path"], "/tmp/cache");
    }

    #[tokio::test]
    async fn test_approve_then_deny_conflicts() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let request = pending(&gate, 4);

        let approved = gate.approve(request.id, "ops", None).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let err = gate.deny(request.id, "ops", None).await.unwrap_err();
        assert!(err.is_conflict());
        let err = gate.approve(request.id, "ops", None).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved {
                status: ApprovalStatus::Approved,
                ..
            }
        ));
        assert_eq!(gate.get(request.id).unwrap().status, ApprovalStatus::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resumes_on_approval() {
        let (_, clock) = manual_clock();
        let gate = Arc::new(ApprovalGate::new(RiskPolicy::default(), clock));
        let request = pending(&gate, 5);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait(request.id).await })
        };
        tokio::task::yield_now().await;
        gate.approve(request.id, "ops", Some("looks fine".into()))
            .await
            .unwrap();

        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        let resolution = resolved.resolution.unwrap();
        assert_eq!(resolution.by, "ops");
        assert_eq!(resolution.reason.as_deref(), Some("looks fine"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_to_expired() {
        let (_, clock) = manual_clock();
        let policy = RiskPolicy::default().with_approval_timeout(Duration::from_secs(30));
        let gate = ApprovalGate::new(policy, clock);
        let request = pending(&gate, 5);

        let resolved = gate.wait(request.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Expired);
        assert_eq!(resolved.resolution.unwrap().by, SYSTEM_APPROVER);

        let err = gate.approve(request.id, "ops", None).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved {
                status: ApprovalStatus::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_late_approval_loses_to_expiry() {
        let (source, clock) = manual_clock();
        let policy = RiskPolicy::default().with_approval_timeout(Duration::from_secs(10));
        let gate = ApprovalGate::new(policy, clock);
        let request = pending(&gate, 5);

        source.advance(Duration::from_secs(11));
        let err = gate.approve(request.id, "ops", None).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved {
                status: ApprovalStatus::Expired,
                ..
            }
        ));
        let resolved = gate.wait(request.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Expired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_resolutions_have_one_winner() {
        let (_, clock) = manual_clock();
        let gate = Arc::new(ApprovalGate::new(RiskPolicy::default(), clock));
        let request = pending(&gate, 5);

        let mut handles = Vec::new();
        for i in 0..8_u8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                if i & 1 == 0 {
                    gate.approve(request.id, "a", None).await
                } else {
                    gate.deny(request.id, "b", None).await
                }
            }));
        }
        let mut winners = 0_u32;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners = winners.saturating_add(1),
                Err(e) => assert!(e.is_conflict()),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_cancel_denies_with_reason() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let request = pending(&gate, 5);

        let cancelled = gate.cancel(request.id).await.unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Denied);
        assert_eq!(
            cancelled.resolution.unwrap().reason.as_deref(),
            Some(CANCELLED_REASON)
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_new_requests() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let mut rx = gate.subscribe();
        let request = pending(&gate, 3);
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.id, request.id);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let err = gate.approve(RequestId::new(), "ops", None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_archive_answers_after_purge() {
        let (_, clock) = manual_clock();
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let gate = ApprovalGate::new(RiskPolicy::default(), clock)
            .with_archive(store)
            .unwrap();
        let request = pending(&gate, 5);
        gate.deny(request.id, "ops", None).await.unwrap();

        assert_eq!(gate.purge_resolved(), 1);
        assert!(gate.get(request.id).is_none());

        let archived = gate.find(request.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ApprovalStatus::Denied);
        let err = gate.approve(request.id, "ops", None).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_release_keeps_pending_and_drops_resolved() {
        let (_, clock) = manual_clock();
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let gate = ApprovalGate::new(RiskPolicy::default(), clock)
            .with_archive(store)
            .unwrap();
        let open = pending(&gate, 4);
        let decided = pending(&gate, 4);
        gate.approve(decided.id, "ops", None).await.unwrap();

        assert!(gate.release(open.id).is_none());
        assert_eq!(gate.pending().len(), 1);
        let released = gate.release(decided.id).unwrap();
        assert_eq!(released.status, ApprovalStatus::Approved);
        assert!(gate.get(decided.id).is_none());

        let err = gate.deny(decided.id, "ops", None).await.unwrap_err();
        assert!(err.is_conflict());
        gate.approve(open.id, "ops", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_and_deny_pending() {
        let (_, clock) = manual_clock();
        let gate = ApprovalGate::new(RiskPolicy::default(), clock);
        let first = pending(&gate, 4);
        let second = pending(&gate, 5);
        gate.approve(first.id, "ops", None).await.unwrap();

        gate.close();
        assert!(matches!(gate.submit(submission(5)), Err(ApprovalError::Closed)));

        let denied = gate.deny_all_pending("shutting down").await.unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].id, second.id);
        assert_eq!(gate.get(first.id).unwrap().status, ApprovalStatus::Approved);
    }
}
