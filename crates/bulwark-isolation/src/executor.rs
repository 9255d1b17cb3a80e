//! Runs an invocation inside its effective boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::retry::{RetryConfig, retry};
use bulwark_core::{IsolationType, RiskLevel, TrustLevel};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::boundary::{ActionBody, Boundary, Invocation, Running};
use crate::container::ContainerBoundary;
use crate::error::{ExecutionFault, IsolationError, IsolationResult};
use crate::inline::InlineBoundary;
use crate::selector::IsolationPolicy;
use crate::subprocess::SubprocessBoundary;

/// Default ceiling on a single spawn attempt.
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Boundary that actually hosted the action.
    pub boundary: IsolationType,
    /// The action's result.
    pub output: Value,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
    /// Spawn attempts made.
    pub attempts: u32,
}

enum Finish {
    Cancelled,
    TimedOut,
    Done(Result<Value, ExecutionFault>),
}

/// Selects, spawns, supervises and tears down isolation boundaries.
pub struct IsolationExecutor {
    policy: IsolationPolicy,
    inline: Arc<dyn Boundary>,
    subprocess: Arc<dyn Boundary>,
    container: Option<Arc<dyn Boundary>>,
    spawn_retry: RetryConfig,
    spawn_timeout: Duration,
}

impl fmt::Debug for IsolationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationExecutor")
            .field("policy", &self.policy)
            .field("container", &self.container.is_some())
            .field("spawn_retry", &self.spawn_retry)
            .field("spawn_timeout", &self.spawn_timeout)
            .finish_non_exhaustive()
    }
}

impl IsolationExecutor {
    /// Build an executor with the built-in boundaries. The container
    /// runtime is detected on PATH; without one, container executions fail
    /// with [`IsolationError::RuntimeUnavailable`].
    #[must_use]
    pub fn new(policy: IsolationPolicy) -> Self {
        let container = match ContainerBoundary::detect() {
            Ok(boundary) => Some(Arc::new(boundary) as Arc<dyn Boundary>),
            Err(e) => {
                debug!(error = %e, "container boundary unavailable");
                None
            },
        };
        Self {
            policy,
            inline: Arc::new(InlineBoundary::new()),
            subprocess: Arc::new(SubprocessBoundary::new()),
            container,
            spawn_retry: RetryConfig::spawn(),
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
        }
    }

    /// Replace the boundary of the same kind.
    #[must_use]
    pub fn with_boundary(mut self, boundary: Arc<dyn Boundary>) -> Self {
        match boundary.kind() {
            IsolationType::Inline => self.inline = boundary,
            IsolationType::Subprocess => self.subprocess = boundary,
            IsolationType::Container => self.container = Some(boundary),
        }
        self
    }

    /// Disable the container boundary.
    #[must_use]
    pub fn without_container(mut self) -> Self {
        self.container = None;
        self
    }

    /// Set the spawn retry policy.
    #[must_use]
    pub fn with_spawn_retry(mut self, config: RetryConfig) -> Self {
        self.spawn_retry = config;
        self
    }

    /// Set the ceiling on a single spawn attempt.
    #[must_use]
    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    /// The selection policy.
    #[must_use]
    pub fn policy(&self) -> &IsolationPolicy {
        &self.policy
    }

    /// Effective boundary for an action; see [`IsolationPolicy::select`].
    #[must_use]
    pub fn select(
        &self,
        trust: TrustLevel,
        risk: RiskLevel,
        declared: IsolationType,
    ) -> IsolationType {
        self.policy.select(trust, risk, declared)
    }

    /// Pick the boundary that hosts `body` at `required` strength or
    /// stronger. Commands never run in-process, so an inline requirement
    /// is met by a subprocess.
    fn host(&self, required: IsolationType, body: &ActionBody) -> IsolationResult<Arc<dyn Boundary>> {
        match (body, required) {
            (ActionBody::Inline(_), IsolationType::Inline) => Ok(self.inline.clone()),
            (ActionBody::Inline(_), boundary) => Err(IsolationError::Unhostable { boundary }),
            (ActionBody::Command(_), IsolationType::Inline | IsolationType::Subprocess) => {
                Ok(self.subprocess.clone())
            },
            (ActionBody::Command(_), IsolationType::Container) => {
                self.container.clone().ok_or_else(|| {
                    IsolationError::RuntimeUnavailable("no container runtime configured".into())
                })
            },
        }
    }

    /// Run `invocation` inside a boundary at least as strong as `required`.
    ///
    /// Spawn failures are retried per the retry policy. The wall-clock limit
    /// and `cancel` both terminate the boundary before returning.
    ///
    /// # Errors
    ///
    /// - [`IsolationError::Unhostable`], [`IsolationError::MissingImage`] or
    ///   [`IsolationError::RuntimeUnavailable`] when no boundary fits
    /// - [`IsolationError::SpawnFailed`] once retries are exhausted
    /// - [`IsolationError::Fault`] when the action fails, times out or
    ///   breaches a limit
    /// - [`IsolationError::Cancelled`] when `cancel` fires first
    pub async fn execute(
        &self,
        required: IsolationType,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> IsolationResult<ExecutionReport> {
        let host = self.host(required, &invocation.body)?;
        let kind = host.kind();
        if cancel.is_cancelled() {
            return Err(IsolationError::Cancelled);
        }

        let spawn_timeout = self.spawn_timeout;
        let attempt_spawn = |attempt: u32| {
            let host = host.clone();
            async move {
                if attempt > 0 {
                    debug!(attempt, boundary = %kind, "retrying spawn");
                }
                match tokio::time::timeout(spawn_timeout, host.spawn(invocation)).await {
                    Ok(result) => result,
                    Err(_) => Err(IsolationError::spawn(kind, "spawn timed out")),
                }
            }
        };
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(IsolationError::Cancelled),
            outcome = retry(&self.spawn_retry, attempt_spawn, IsolationError::is_retryable) => outcome,
        };
        let attempts = outcome.attempts();
        let mut running = outcome.into_result()?;

        let started = Instant::now();
        let limit = invocation.limits.timeout();
        let finish = tokio::select! {
            biased;
            () = cancel.cancelled() => Finish::Cancelled,
            result = tokio::time::timeout(limit, running.wait()) => {
                result.map_or(Finish::TimedOut, Finish::Done)
            },
        };
        let duration = started.elapsed();

        match finish {
            Finish::Cancelled => {
                running.kill().await;
                info!(action_id = %invocation.action_id, boundary = %kind, "execution cancelled");
                Err(IsolationError::Cancelled)
            },
            Finish::TimedOut => {
                running.kill().await;
                warn!(
                    action_id = %invocation.action_id,
                    boundary = %kind,
                    limit_secs = invocation.limits.timeout_secs,
                    "execution timed out"
                );
                Err(ExecutionFault::Timeout {
                    limit_secs: invocation.limits.timeout_secs,
                }
                .into())
            },
            Finish::Done(Ok(output)) => {
                info!(
                    action_id = %invocation.action_id,
                    boundary = %kind,
                    duration_ms = duration.as_millis(),
                    attempts,
                    "execution succeeded"
                );
                Ok(ExecutionReport {
                    boundary: kind,
                    output,
                    duration,
                    attempts,
                })
            },
            Finish::Done(Err(fault)) => {
                info!(
                    action_id = %invocation.action_id,
                    boundary = %kind,
                    kind = fault.kind(),
                    "execution faulted"
                );
                Err(fault.into())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{CommandSpec, InlineAction};
    use async_trait::async_trait;
    use bulwark_core::{ActionId, ResourceLimits};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Sleepy(Duration);

    #[async_trait]
    impl InlineAction for Sleepy {
        async fn run(&self, input: Value) -> Result<Value, String> {
            tokio::time::sleep(self.0).await;
            Ok(input)
        }
    }

    struct Broken;

    #[async_trait]
    impl InlineAction for Broken {
        async fn run(&self, _input: Value) -> Result<Value, String> {
            Err("disk on fire".to_string())
        }
    }

    struct Done;

    #[async_trait]
    impl Running for Done {
        async fn wait(&mut self) -> Result<Value, ExecutionFault> {
            Ok(json!("spawned"))
        }

        async fn kill(&mut self) {}
    }

    /// Fails the first `failures` spawns.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Boundary for Flaky {
        fn kind(&self) -> IsolationType {
            IsolationType::Subprocess
        }

        async fn spawn(&self, _invocation: &Invocation) -> IsolationResult<Box<dyn Running>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(IsolationError::spawn(IsolationType::Subprocess, "resource busy"))
            } else {
                Ok(Box::new(Done))
            }
        }
    }

    fn invocation(body: ActionBody, timeout_secs: u64) -> Invocation {
        Invocation {
            action_id: ActionId::new(),
            body,
            input: json!({ "x": 1 }),
            limits: ResourceLimits {
                timeout_secs,
                ..ResourceLimits::default()
            },
        }
    }

    fn executor() -> IsolationExecutor {
        IsolationExecutor::new(IsolationPolicy::default()).without_container()
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_success_report() {
        let inv = invocation(ActionBody::inline(Sleepy(Duration::from_secs(2))), 10);
        let report = executor()
            .execute(IsolationType::Inline, &inv, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.boundary, IsolationType::Inline);
        assert_eq!(report.output, json!({ "x": 1 }));
        assert_eq!(report.attempts, 1);
        assert!(report.duration >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fault_is_not_retried() {
        let inv = invocation(ActionBody::inline(Broken), 10);
        let err = executor()
            .execute(IsolationType::Inline, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IsolationError::Fault(ExecutionFault::Failed { ref detail, .. }) if detail == "disk on fire"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_timeout() {
        let inv = invocation(ActionBody::inline(Sleepy(Duration::from_secs(120))), 1);
        let err = executor()
            .execute(IsolationType::Inline, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IsolationError::Fault(ExecutionFault::Timeout { limit_secs: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_terminates() {
        let inv = invocation(ActionBody::inline(Sleepy(Duration::from_secs(120))), 300);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let err = executor()
            .execute(IsolationType::Inline, &inv, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::Cancelled));
    }

    #[tokio::test]
    async fn test_inline_body_under_stronger_boundary_is_unhostable() {
        let inv = invocation(ActionBody::inline(Broken), 10);
        let err = executor()
            .execute(IsolationType::Subprocess, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IsolationError::Unhostable {
                boundary: IsolationType::Subprocess
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_container_runtime() {
        let inv = invocation(ActionBody::Command(CommandSpec::new("true").image("alpine")), 10);
        let err = executor()
            .execute(IsolationType::Container, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::RuntimeUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_is_retried() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let executor = executor().with_boundary(flaky.clone());
        let inv = invocation(ActionBody::Command(CommandSpec::new("anything")), 10);
        let report = executor
            .execute(IsolationType::Subprocess, &inv, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.output, json!("spawned"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_retries_exhaust() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let executor = executor().with_boundary(flaky.clone());
        let inv = invocation(ActionBody::Command(CommandSpec::new("anything")), 10);
        let err = executor
            .execute(IsolationType::Subprocess, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::SpawnFailed { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_under_inline_requirement_runs_as_subprocess() {
        let inv = invocation(
            ActionBody::Command(CommandSpec::new("sh").arg("-c").arg("echo 42")),
            10,
        );
        let report = executor()
            .execute(IsolationType::Inline, &inv, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.boundary, IsolationType::Subprocess);
        assert_eq!(report.output, json!(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_timeout_kills_child() {
        let inv = invocation(
            ActionBody::Command(CommandSpec::new("sh").arg("-c").arg("exec sleep 30")),
            1,
        );
        let started = std::time::Instant::now();
        let err = executor()
            .execute(IsolationType::Subprocess, &inv, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IsolationError::Fault(ExecutionFault::Timeout { limit_secs: 1 })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
