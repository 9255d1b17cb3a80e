//! The execution guard: the single entry point every action passes through.
//!
//! # Protocol
//!
//! 1. **Manifest** - structural validation against the configured ceilings
//!    - If malformed -> `manifest_rejected`, reject
//! 2. **Capabilities** - every required pattern must be covered by a live
//!    grant
//!    - If any is missing -> `capability_denied`, reject
//! 3. **Approval** - at or above the approval threshold the action
//!    suspends until a human decides or the window elapses
//!    - If denied or expired -> `approval_denied`, reject
//! 4. **Checkpoint** - the writable scope is locked for the rest of the
//!    action; at or above the checkpoint floor it is also snapshotted
//!    - If that fails -> `checkpoint_failed`, reject
//! 5. **Execution** - inside the strongest of the declared boundary and the
//!    trust floor, under the manifest's limits
//! 6. **Settlement** - commit the checkpoint on success, roll back on any
//!    failure
//!
//! Every step is audited before the next begins, so the entries of one
//! action are strictly ordered and share its correlation id. A failed
//! audit write fails the action.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bulwark_approval::{
    Admission, ApprovalGate, ApprovalStatus, ApprovalSubmission, CANCELLED_REASON, RiskPolicy,
    SYSTEM_APPROVER,
};
use bulwark_audit::{Actor, AuditEvent, AuditLog};
use bulwark_capabilities::{Capability, CapabilityRegistry, ResourceClass};
use bulwark_checkpoint::{
    Checkpoint, CheckpointScope, CheckpointStore, CompositeStateStore, KvStateStore, ScopeGuard,
};
use bulwark_clock::ClockService;
use bulwark_core::{
    ActionId, CorrelationId, ManifestCeilings, PrincipalId, RiskLevel, ValidatedManifest,
};
use bulwark_crypto::{ContentHash, KeyPair};
use bulwark_isolation::{Invocation, IsolationExecutor, IsolationPolicy};
use bulwark_storage::KvStore;
use bulwark_telemetry::ActionContext;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{GuardError, GuardResult};
use crate::request::{ActionRequest, ExecutionContext};
use crate::result::{ActionMetrics, ActionResult};
use crate::trail::Trail;

/// Reason recorded on approvals denied by [`ExecutionGuard::shutdown`].
pub const SHUTDOWN_REASON: &str = "shutdown";

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The services the guard composes. Each is an owned, shareable singleton
/// with its own narrow locking.
#[derive(Clone)]
pub struct GuardServices {
    /// Time source for expiry, approval windows and audit timestamps.
    pub clock: Arc<ClockService>,
    /// Who may do what.
    pub registry: Arc<CapabilityRegistry>,
    /// Hash-chained record of every decision.
    pub audit: Arc<AuditLog>,
    /// Human approval for risky actions.
    pub approvals: Arc<ApprovalGate>,
    /// Snapshots around risky actions.
    pub checkpoints: Arc<CheckpointStore>,
    /// Boundary selection and supervision.
    pub executor: Arc<IsolationExecutor>,
}

impl fmt::Debug for GuardServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardServices")
            .field("policy", self.approvals.policy())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl GuardServices {
    /// Ephemeral services: in-memory registry, audit log and approvals,
    /// with `kv:` checkpoint scopes backed by `state`.
    #[must_use]
    pub fn in_memory(clock: Arc<ClockService>, policy: RiskPolicy, state: Arc<dyn KvStore>) -> Self {
        let states =
            CompositeStateStore::new().with(ResourceClass::Kv, Arc::new(KvStateStore::new(state)));
        Self {
            registry: Arc::new(CapabilityRegistry::new(Arc::clone(&clock))),
            audit: Arc::new(AuditLog::in_memory(Arc::clone(&clock), KeyPair::generate())),
            approvals: Arc::new(ApprovalGate::new(policy, Arc::clone(&clock))),
            checkpoints: Arc::new(CheckpointStore::new(Arc::clone(&clock), Arc::new(states))),
            executor: Arc::new(IsolationExecutor::new(IsolationPolicy::default())),
            clock,
        }
    }

    /// Replace the executor.
    #[must_use]
    pub fn with_executor(mut self, executor: IsolationExecutor) -> Self {
        self.executor = Arc::new(executor);
        self
    }
}

struct Inner {
    services: GuardServices,
    ceilings: ManifestCeilings,
    tracker: TaskTracker,
    cancel_root: CancellationToken,
    accepting: AtomicBool,
}

/// A running action.
#[derive(Debug)]
pub struct ActionHandle {
    action_id: ActionId,
    correlation_id: CorrelationId,
    cancel: CancellationToken,
    task: JoinHandle<ActionResult>,
}

impl ActionHandle {
    /// The action.
    #[must_use]
    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    /// Correlation id of the action's audit entries.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Cancel the action.
    ///
    /// A pending approval is withdrawn. A running boundary is terminated
    /// and any checkpoint rolled back.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by the action.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the result envelope.
    pub async fn join(self) -> ActionResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(action_id = %self.action_id, error = %e, "guard task did not complete");
                ActionResult::from_outcome(
                    self.action_id,
                    self.correlation_id,
                    &Err(GuardError::cancelled("join")),
                    ActionMetrics::default(),
                )
            },
        }
    }
}

/// Runs actions through capability, approval, checkpoint and isolation
/// layers, auditing each step.
#[derive(Clone)]
pub struct ExecutionGuard {
    inner: Arc<Inner>,
}

impl fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("ceilings", &self.inner.ceilings)
            .field("in_flight", &self.inner.tracker.len())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl ExecutionGuard {
    /// Create a guard over `services`.
    #[must_use]
    pub fn new(services: GuardServices, ceilings: ManifestCeilings) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                ceilings,
                tracker: TaskTracker::new(),
                cancel_root: CancellationToken::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// The composed services.
    #[must_use]
    pub fn services(&self) -> &GuardServices {
        &self.inner.services
    }

    /// The approval gate, for approvers.
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalGate> {
        &self.inner.services.approvals
    }

    /// The audit log.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.inner.services.audit
    }

    /// Whether new actions are admitted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Number of actions still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Start an action in the background.
    pub fn spawn(&self, request: ActionRequest) -> ActionHandle {
        let mut ctx = ActionContext::new(request.principal.clone())
            .with_action_name(request.manifest.name.clone());
        if let Some(risk) = RiskLevel::new(request.manifest.risk_level) {
            ctx = ctx.with_risk_level(risk);
        }
        let action_id = ctx.action_id;
        let correlation_id = ctx.correlation_id;
        let cancel = self.inner.cancel_root.child_token();

        let span = ctx.span();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let task = self
            .inner
            .tracker
            .spawn(async move { inner.run(request, ctx, token).await }.instrument(span));

        ActionHandle {
            action_id,
            correlation_id,
            cancel,
            task,
        }
    }

    /// Run an action to completion.
    pub async fn execute(&self, request: ActionRequest) -> ActionResult {
        self.spawn(request).join().await
    }

    /// Cancel every running action. Actions spawned afterwards start
    /// cancelled.
    pub fn cancel_all(&self) {
        self.inner.cancel_root.cancel();
    }

    /// Stop admitting actions, deny pending approvals and wait for
    /// in-flight actions to finish.
    ///
    /// # Errors
    ///
    /// Returns an approval error if denying pending requests fails to
    /// archive. Admission is stopped regardless.
    pub async fn shutdown(&self) -> GuardResult<()> {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let approvals = &self.inner.services.approvals;
        approvals.close();
        let denied = approvals.deny_all_pending(SHUTDOWN_REASON).await?;
        info!(
            denied = denied.len(),
            in_flight = self.inner.tracker.len(),
            "execution guard draining"
        );
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("execution guard stopped");
        Ok(())
    }
}

/// What step 4 holds until settlement.
#[derive(Default)]
struct Held {
    checkpoint: Option<Checkpoint>,
    lock: Option<ScopeGuard>,
}

/// What admission established about an action.
struct Admitted {
    manifest: ValidatedManifest,
    granted: Vec<Capability>,
}

impl Inner {
    async fn run(
        &self,
        request: ActionRequest,
        ctx: ActionContext,
        cancel: CancellationToken,
    ) -> ActionResult {
        let started = Instant::now();
        let mut metrics = ActionMetrics::default();
        let mut trail = Trail::new(
            Arc::clone(&self.services.audit),
            Actor::Principal(request.principal.clone()),
            ctx.action_id,
            ctx.correlation_id,
        );

        let outcome = if self.accepting.load(Ordering::SeqCst) {
            self.protocol(&request, &ctx, &cancel, &mut trail, &mut metrics)
                .await
        } else {
            Err(GuardError::cancelled(SHUTDOWN_REASON))
        };

        metrics.audit_entries = trail.written();
        metrics.total_ms = millis(started.elapsed());
        match &outcome {
            Ok(_) => info!(total_ms = metrics.total_ms, "action succeeded"),
            Err(e) => warn!(
                kind = %e.kind(),
                error = %e,
                rolled_back = metrics.rolled_back,
                "action failed"
            ),
        }
        ActionResult::from_outcome(ctx.action_id, ctx.correlation_id, &outcome, metrics)
    }

    async fn protocol(
        &self,
        request: &ActionRequest,
        ctx: &ActionContext,
        cancel: &CancellationToken,
        trail: &mut Trail,
        metrics: &mut ActionMetrics,
    ) -> GuardResult<Value> {
        let admitted = self.admit(request, trail).await?;
        if cancel.is_cancelled() {
            return cancelled_at("admission", trail).await;
        }

        self.approve(request, ctx, &admitted, cancel, trail, metrics)
            .await?;

        let Held { checkpoint, lock } = self
            .checkpoint(request, ctx, &admitted, cancel, trail)
            .await?;
        metrics.checkpoint_id = checkpoint.as_ref().map(|c| c.id);

        let executed = self
            .execute(request, ctx, &admitted, checkpoint.as_ref(), cancel, trail, metrics)
            .await;
        let settled = self
            .settle(executed, checkpoint, &request.principal, trail, metrics)
            .await;
        drop(lock);
        settled
    }

    /// Steps 1 and 2.
    async fn admit(&self, request: &ActionRequest, trail: &mut Trail) -> GuardResult<Admitted> {
        let validated = request
            .manifest
            .validate(&self.ceilings)
            .map_err(GuardError::from)
            .and_then(|manifest| {
                let granted = manifest
                    .required_capabilities()
                    .iter()
                    .map(|raw| {
                        Capability::parse(raw).map_err(|e| GuardError::InvalidManifest {
                            field: "required_capabilities".to_string(),
                            reason: e.to_string(),
                        })
                    })
                    .collect::<GuardResult<Vec<_>>>()?;
                Ok(Admitted { manifest, granted })
            });
        let admitted = match validated {
            Ok(admitted) => admitted,
            Err(err) => {
                info!(error = %err, "manifest rejected");
                trail
                    .record_failure(
                        AuditEvent::ManifestRejected {
                            name: request.manifest.name.clone(),
                            reason: err.to_string(),
                        },
                        err.to_string(),
                    )
                    .await?;
                return Err(err);
            },
        };

        let check = self
            .services
            .registry
            .check_detailed(&request.principal, &admitted.granted);
        if !check.is_allowed() {
            let missing: Vec<String> = check.missing.iter().map(ToString::to_string).collect();
            info!(missing = ?missing, "capability check failed");
            let err = GuardError::CapabilityDenied {
                missing: missing.clone(),
            };
            trail
                .record_failure(AuditEvent::CapabilityDenied { missing }, err.to_string())
                .await?;
            return Err(err);
        }
        trail
            .record(AuditEvent::CapabilitiesVerified {
                capabilities: admitted
                    .granted
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .await?;
        debug!(count = admitted.granted.len(), "capabilities verified");
        Ok(admitted)
    }

    /// Step 3.
    async fn approve(
        &self,
        request: &ActionRequest,
        ctx: &ActionContext,
        admitted: &Admitted,
        cancel: &CancellationToken,
        trail: &mut Trail,
        metrics: &mut ActionMetrics,
    ) -> GuardResult<()> {
        let approvals = &self.services.approvals;
        let risk = admitted.manifest.risk_level();
        let submitted = approvals.submit(ApprovalSubmission {
            action_id: ctx.action_id,
            principal: request.principal.clone(),
            risk_level: risk,
            summary: request.summary(),
            state: request.input.clone(),
        });

        let pending = match submitted {
            Ok(Admission::AutoApproved) => {
                trail
                    .record(AuditEvent::ApprovalGranted {
                        request_id: None,
                        approver: SYSTEM_APPROVER.to_string(),
                        automatic: true,
                    })
                    .await?;
                return Ok(());
            },
            Ok(Admission::Pending(pending)) => pending,
            Err(err) => {
                let err = GuardError::from(err);
                trail
                    .record_failure(
                        AuditEvent::ExecutionCancelled {
                            stage: "approval".to_string(),
                        },
                        err.to_string(),
                    )
                    .await?;
                return Err(err);
            },
        };

        trail
            .record(AuditEvent::ApprovalRequested {
                request_id: pending.id,
                risk_level: risk,
                timeout_at: pending.timeout_at,
            })
            .await?;
        info!(request_id = %pending.id, risk = risk.get(), "awaiting approval");

        let waited = Instant::now();
        let resolved = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            resolved = approvals.wait(pending.id) => Some(resolved),
        };
        metrics.approval_wait_ms = millis(waited.elapsed());

        let Some(resolved) = resolved else {
            match approvals.cancel(pending.id).await {
                Ok(_) => {},
                Err(e) if e.is_conflict() => debug!(error = %e, "request resolved before cancel"),
                Err(e) => return Err(e.into()),
            }
            approvals.release(pending.id);
            trail
                .record_failure(
                    AuditEvent::ApprovalDenied {
                        request_id: pending.id,
                        status: ApprovalStatus::Denied.to_string(),
                        reason: Some(CANCELLED_REASON.to_string()),
                    },
                    CANCELLED_REASON,
                )
                .await?;
            return Err(GuardError::cancelled("approval"));
        };

        let resolved = resolved?;
        approvals.release(resolved.id);
        let resolution = resolved.resolution.clone();
        if resolved.status == ApprovalStatus::Approved {
            trail
                .record(AuditEvent::ApprovalGranted {
                    request_id: Some(resolved.id),
                    approver: resolution.map(|r| r.by).unwrap_or_default(),
                    automatic: false,
                })
                .await?;
            return Ok(());
        }

        let reason = resolution.and_then(|r| r.reason);
        let err = GuardError::ApprovalDenied {
            request_id: resolved.id,
            status: resolved.status,
            reason: reason.clone(),
        };
        trail
            .record_failure(
                AuditEvent::ApprovalDenied {
                    request_id: resolved.id,
                    status: resolved.status.to_string(),
                    reason,
                },
                err.to_string(),
            )
            .await?;
        Err(err)
    }

    /// Step 4.
    async fn checkpoint(
        &self,
        request: &ActionRequest,
        ctx: &ActionContext,
        admitted: &Admitted,
        cancel: &CancellationToken,
        trail: &mut Trail,
    ) -> GuardResult<Held> {
        let risk = admitted.manifest.risk_level();
        let scope = CheckpointScope::from_capabilities(&admitted.granted);
        if !self.services.approvals.policy().requires_checkpoint(risk) {
            if scope.is_empty() {
                return Ok(Held::default());
            }
            return self
                .lock_unchecked(&scope, cancel, trail)
                .await
                .map(|guard| Held {
                    checkpoint: None,
                    lock: Some(guard),
                });
        }

        let created = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            created = self.services.checkpoints.create(ctx.action_id, &request.principal, scope) => Some(created),
        };
        let checkpoint = match created {
            None => return cancelled_at("checkpoint", trail).await,
            Some(Ok(checkpoint)) => checkpoint,
            Some(Err(err)) => {
                let err = GuardError::from(err);
                error!(error = %err, "required checkpoint could not be taken");
                trail
                    .record_failure(
                        AuditEvent::CheckpointFailed {
                            reason: err.to_string(),
                        },
                        err.to_string(),
                    )
                    .await?;
                return Err(err);
            },
        };

        let recorded = trail
            .record(AuditEvent::CheckpointCreated {
                checkpoint_id: checkpoint.id,
                scope: checkpoint.scope.entries().map(ToString::to_string).collect(),
                integrity: checkpoint.integrity,
            })
            .await;
        if let Err(err) = recorded {
            // Nothing ran yet; release the scope.
            if let Err(e) = self.services.checkpoints.commit(checkpoint.id).await {
                warn!(checkpoint_id = %checkpoint.id, error = %e, "failed to release checkpoint");
            }
            return Err(err);
        }
        Ok(Held {
            checkpoint: Some(checkpoint),
            lock: None,
        })
    }

    /// Below the floor the scope is locked but not captured, so no
    /// concurrent checkpoint can roll back over this action's writes.
    async fn lock_unchecked(
        &self,
        scope: &CheckpointScope,
        cancel: &CancellationToken,
        trail: &mut Trail,
    ) -> GuardResult<ScopeGuard> {
        let locked = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            locked = self.services.checkpoints.lock_scope(scope) => Some(locked),
        };
        match locked {
            None => cancelled_at("checkpoint", trail).await,
            Some(Ok(guard)) => {
                debug!(scope = %scope, "scope locked without checkpoint");
                Ok(guard)
            },
            Some(Err(err)) => {
                let err = GuardError::from(err);
                warn!(error = %err, "scope lock not acquired");
                trail
                    .record_failure(
                        AuditEvent::CheckpointFailed {
                            reason: err.to_string(),
                        },
                        err.to_string(),
                    )
                    .await?;
                Err(err)
            },
        }
    }

    /// Step 5.
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        request: &ActionRequest,
        ctx: &ActionContext,
        admitted: &Admitted,
        checkpoint: Option<&Checkpoint>,
        cancel: &CancellationToken,
        trail: &mut Trail,
        metrics: &mut ActionMetrics,
    ) -> GuardResult<Value> {
        let manifest = &admitted.manifest;
        let boundary = self.services.executor.select(
            manifest.trust_level(),
            manifest.risk_level(),
            manifest.isolation_type(),
        );
        if cancel.is_cancelled() {
            return cancelled_at("execution", trail).await;
        }

        let context = ExecutionContext {
            action_id: ctx.action_id,
            correlation_id: ctx.correlation_id,
            principal: request.principal.clone(),
            granted: admitted.granted.clone(),
            limits: manifest.limits(),
            checkpoint_id: checkpoint.map(|c| c.id),
            boundary,
        };
        let invocation = Invocation {
            action_id: ctx.action_id,
            body: context.apply(&request.body),
            input: request.input.clone(),
            limits: context.limits,
        };

        trail
            .record(AuditEvent::ExecutionStarted {
                boundary,
                limits: context.limits,
            })
            .await?;
        metrics.boundary = Some(boundary);
        info!(boundary = %boundary, timeout_secs = context.limits.timeout_secs, "executing");

        let started = Instant::now();
        let executed = self
            .services
            .executor
            .execute(boundary, &invocation, cancel)
            .await;
        let elapsed = started.elapsed();
        metrics.execution_ms = millis(elapsed);

        match executed {
            Ok(report) => {
                metrics.boundary = Some(report.boundary);
                metrics.spawn_attempts = report.attempts;
                let result_hash = serde_json::to_vec(&report.output)
                    .ok()
                    .map(|bytes| ContentHash::hash(&bytes));
                trail
                    .record(AuditEvent::ExecutionSucceeded {
                        duration_ms: millis(report.duration),
                        result_hash,
                    })
                    .await?;
                Ok(report.output)
            },
            Err(err) => {
                let err = GuardError::from(err);
                let event = match &err {
                    GuardError::Cancelled { stage } => AuditEvent::ExecutionCancelled {
                        stage: stage.clone(),
                    },
                    other => AuditEvent::ExecutionFailed {
                        kind: other.failure_tag().to_string(),
                        detail: other.to_string(),
                        duration_ms: millis(elapsed),
                    },
                };
                trail.record_failure(event, err.to_string()).await?;
                Err(err)
            },
        }
    }

    /// Step 6.
    async fn settle(
        &self,
        outcome: GuardResult<Value>,
        checkpoint: Option<Checkpoint>,
        principal: &PrincipalId,
        trail: &mut Trail,
        metrics: &mut ActionMetrics,
    ) -> GuardResult<Value> {
        let Some(checkpoint) = checkpoint else {
            return outcome;
        };
        let checkpoints = &self.services.checkpoints;

        match outcome {
            Ok(value) => {
                match checkpoints.commit(checkpoint.id).await {
                    Ok(()) => {
                        trail
                            .record(AuditEvent::CheckpointCommitted {
                                checkpoint_id: checkpoint.id,
                            })
                            .await?;
                    },
                    Err(e) => {
                        // The action already succeeded; the stale snapshot
                        // is reported, not rolled back.
                        warn!(checkpoint_id = %checkpoint.id, error = %e, "checkpoint commit failed");
                        trail
                            .record_failure(
                                AuditEvent::CheckpointFailed {
                                    reason: format!("commit failed: {e}"),
                                },
                                e.to_string(),
                            )
                            .await?;
                    },
                }
                Ok(value)
            },
            Err(err) => {
                let (event, failure) = match checkpoints.rollback(checkpoint.id, principal).await {
                    Ok(_) => {
                        metrics.rolled_back = true;
                        info!(checkpoint_id = %checkpoint.id, "state rolled back");
                        (
                            AuditEvent::RollbackExecuted {
                                checkpoint_id: checkpoint.id,
                            },
                            None,
                        )
                    },
                    Err(e) => {
                        error!(checkpoint_id = %checkpoint.id, error = %e, "rollback failed");
                        (
                            AuditEvent::RollbackFailed {
                                checkpoint_id: checkpoint.id,
                                reason: e.to_string(),
                            },
                            Some(e.to_string()),
                        )
                    },
                };
                let recorded = match failure {
                    None => trail.record(event).await,
                    Some(reason) => trail.record_failure(event, reason).await,
                };
                if let Err(audit_err) = recorded {
                    error!(error = %audit_err, "failed to audit rollback");
                }
                Err(err)
            },
        }
    }
}

/// Record a cancellation observed between steps.
async fn cancelled_at<T>(stage: &str, trail: &mut Trail) -> GuardResult<T> {
    let err = GuardError::cancelled(stage);
    trail
        .record_failure(
            AuditEvent::ExecutionCancelled {
                stage: stage.to_string(),
            },
            err.to_string(),
        )
        .await?;
    Err(err)
}
