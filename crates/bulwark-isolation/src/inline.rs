//! In-process boundary.
//!
//! Runs trusted builtins on a tokio task. Only the wall-clock limit is
//! enforced (by the executor); memory and cpu are shared with the host.

use async_trait::async_trait;
use bulwark_core::IsolationType;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::boundary::{ActionBody, Boundary, Invocation, Running};
use crate::error::{ExecutionFault, IsolationError, IsolationResult};

/// Hosts [`ActionBody::Inline`] actions on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBoundary;

impl InlineBoundary {
    /// Create an inline boundary.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct InlineRunning {
    task: JoinHandle<Result<Value, String>>,
}

#[async_trait]
impl Running for InlineRunning {
    async fn wait(&mut self) -> Result<Value, ExecutionFault> {
        match (&mut self.task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(detail)) => Err(ExecutionFault::Failed {
                detail,
                exit_code: None,
            }),
            Err(e) if e.is_panic() => Err(ExecutionFault::Failed {
                detail: "action panicked".to_string(),
                exit_code: None,
            }),
            Err(e) => Err(ExecutionFault::Failed {
                detail: e.to_string(),
                exit_code: None,
            }),
        }
    }

    async fn kill(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Boundary for InlineBoundary {
    fn kind(&self) -> IsolationType {
        IsolationType::Inline
    }

    async fn spawn(&self, invocation: &Invocation) -> IsolationResult<Box<dyn Running>> {
        let ActionBody::Inline(action) = &invocation.body else {
            return Err(IsolationError::spawn(
                IsolationType::Inline,
                "inline boundary only hosts in-process actions",
            ));
        };
        debug!(action_id = %invocation.action_id, "spawning inline action");
        let action = action.clone();
        let input = invocation.input.clone();
        let task = tokio::spawn(async move { action.run(input).await });
        Ok(Box::new(InlineRunning { task }))
    }
}
