//! Container boundary.
//!
//! Drives the `docker` or `podman` CLI. Each execution gets a fresh
//! `--rm` container with no network, a memory ceiling, a cpu ulimit and a
//! pid cap. The JSON input is streamed on stdin exactly as for
//! subprocesses.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bulwark_core::{ActionId, IsolationType, ResourceLimits};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::boundary::{ActionBody, Boundary, CommandSpec, Invocation, Running, parse_output};
use crate::error::{ExecutionFault, IsolationError, IsolationResult};
use crate::subprocess::ChildProcess;

/// Runtimes probed on PATH, in order.
const RUNTIMES: &[&str] = &["docker", "podman"];

/// Process cap inside every container.
pub const CONTAINER_PIDS_LIMIT: u32 = 256;

/// Exit code of a container killed by the kernel (OOM or SIGKILL).
const EXIT_KILLED: i32 = 137;
/// Exit code of a container whose process hit its cpu ulimit (SIGXCPU).
const EXIT_CPU: i32 = 152;
/// Exit code when the runtime itself failed to start the container.
const EXIT_RUNTIME_ERROR: i32 = 125;

/// Hosts [`ActionBody::Command`] actions in throwaway containers.
#[derive(Debug, Clone)]
pub struct ContainerBoundary {
    runtime: PathBuf,
}

impl ContainerBoundary {
    /// Use a specific runtime binary.
    #[must_use]
    pub fn new(runtime: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    /// Find `docker` or `podman` on PATH.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::RuntimeUnavailable`] when neither is
    /// installed.
    pub fn detect() -> IsolationResult<Self> {
        RUNTIMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .ok_or_else(|| {
                IsolationError::RuntimeUnavailable(format!("none of {} on PATH", RUNTIMES.join(", ")))
            })
    }

    /// The runtime binary.
    #[must_use]
    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    /// Container name for an action.
    #[must_use]
    pub fn container_name(action_id: ActionId) -> String {
        format!("bulwark-{}", action_id.0)
    }

    /// Arguments passed to `{runtime} run`.
    #[must_use]
    pub fn run_args(
        spec: &CommandSpec,
        image: &str,
        name: &str,
        limits: ResourceLimits,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--pids-limit".to_string(),
            CONTAINER_PIDS_LIMIT.to_string(),
        ];
        if limits.memory_mb > 0 {
            let memory = format!("{}m", limits.memory_mb);
            args.extend(["--memory".to_string(), memory.clone()]);
            args.extend(["--memory-swap".to_string(), memory]);
        }
        if limits.cpu_secs > 0 {
            args.extend([
                "--ulimit".to_string(),
                format!("cpu={0}:{0}", limits.cpu_secs),
            ]);
        }
        for (key, value) in &spec.env {
            args.extend(["-e".to_string(), format!("{key}={value}")]);
        }
        args.push(image.to_string());
        args.push(spec.program.clone());
        args.extend(spec.args.iter().cloned());
        args
    }
}

struct ContainerRunning {
    process: ChildProcess,
    runtime: PathBuf,
    name: String,
}

#[async_trait]
impl Running for ContainerRunning {
    async fn wait(&mut self) -> Result<Value, ExecutionFault> {
        let exited = self.process.finish().await?;
        if exited.status.success() {
            return Ok(parse_output(&exited.stdout));
        }
        match exited.status.code() {
            Some(EXIT_KILLED) => Err(ExecutionFault::LimitExceeded {
                resource: "memory".to_string(),
            }),
            Some(EXIT_CPU) => Err(ExecutionFault::LimitExceeded {
                resource: "cpu".to_string(),
            }),
            Some(EXIT_RUNTIME_ERROR) => Err(ExecutionFault::Failed {
                detail: format!("container runtime error: {}", exited.stderr_tail()),
                exit_code: Some(EXIT_RUNTIME_ERROR),
            }),
            _ => {
                let fault = exited.failure();
                warn!(container = %self.name, error = %fault, "container action failed");
                Err(fault)
            },
        }
    }

    async fn kill(&mut self) {
        // Killing the CLI alone leaves the container running.
        let status = Command::new(&self.runtime)
            .args(["kill", &self.name])
            .kill_on_drop(true)
            .output()
            .await;
        match status {
            Ok(out) if out.status.success() => debug!(container = %self.name, "container killed"),
            Ok(out) => debug!(
                container = %self.name,
                stderr = %String::from_utf8_lossy(&out.stderr),
                "container kill reported failure"
            ),
            Err(e) => warn!(container = %self.name, error = %e, "failed to run container kill"),
        }
        self.process.kill().await;
    }
}

#[async_trait]
impl Boundary for ContainerBoundary {
    fn kind(&self) -> IsolationType {
        IsolationType::Container
    }

    async fn spawn(&self, invocation: &Invocation) -> IsolationResult<Box<dyn Running>> {
        let ActionBody::Command(spec) = &invocation.body else {
            return Err(IsolationError::Unhostable {
                boundary: IsolationType::Container,
            });
        };
        let image = spec.image.as_deref().ok_or(IsolationError::MissingImage)?;
        let name = Self::container_name(invocation.action_id);

        let mut cmd = Command::new(&self.runtime);
        cmd.args(Self::run_args(spec, image, &name, invocation.limits));
        let process = ChildProcess::launch(IsolationType::Container, cmd, &invocation.input)?;
        debug!(
            action_id = %invocation.action_id,
            runtime = %self.runtime.display(),
            image,
            container = %name,
            "spawned container action"
        );
        Ok(Box::new(ContainerRunning {
            process,
            runtime: self.runtime.clone(),
            name,
        }))
    }
}
