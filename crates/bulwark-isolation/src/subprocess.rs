//! Subprocess boundary.
//!
//! # Security
//!
//! - Environment is cleared and only an allowlist is inherited
//! - PATH is restricted to system directories
//! - On unix, `RLIMIT_CPU` and `RLIMIT_AS` are applied before exec
//! - The child is killed if its handle is dropped

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use bulwark_core::{IsolationType, ResourceLimits};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::boundary::{ActionBody, Boundary, CommandSpec, Invocation, Running, parse_output};
use crate::error::{ExecutionFault, IsolationError, IsolationResult};

/// Environment variables inherited from the host.
const ALLOWED_ENV_VARS: &[&str] = &[
    "HOME", "USER", "SHELL", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR", "TMP", "TEMP",
];

/// Directories forming the child's PATH.
#[cfg(unix)]
const SAFE_PATH_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/local/bin"];

#[cfg(windows)]
const SAFE_PATH_DIRS: &[&str] = &[r"C:\Windows\System32", r"C:\Windows"];

/// Largest stdout or stderr capture kept per stream: 8 MiB.
pub const MAX_OUTPUT_BYTES: u64 = 8_388_608;

/// Hosts [`ActionBody::Command`] actions as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessBoundary;

impl SubprocessBoundary {
    /// Create a subprocess boundary.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn safe_path() -> String {
        SAFE_PATH_DIRS.join(if cfg!(windows) { ";" } else { ":" })
    }

    /// Build the sandboxed command for `spec`.
    #[allow(unsafe_code)]
    fn build_command(spec: &CommandSpec, limits: ResourceLimits) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.env_clear();
        cmd.env("PATH", Self::safe_path());
        for var in ALLOWED_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        cmd.envs(&spec.env);

        #[cfg(unix)]
        {
            let cpu = limits.cpu_secs;
            let memory = limits.memory_bytes();
            // SAFETY: pre_exec runs between fork() and exec(). The closure
            // only calls setrlimit with values computed before the fork and
            // converts errno into an io::Error without allocating.
            unsafe {
                cmd.pre_exec(move || apply_rlimits(cpu, memory));
            }
        }
        #[cfg(not(unix))]
        let _ = limits;

        cmd
    }
}

/// Apply cpu and address-space ceilings to the current process.
#[cfg(unix)]
fn apply_rlimits(cpu_secs: u64, memory_bytes: u64) -> std::io::Result<()> {
    use nix::sys::resource::{Resource, setrlimit};

    if cpu_secs > 0 {
        // SIGXCPU at the soft limit, SIGKILL one second later.
        setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs.saturating_add(1))?;
    }
    if memory_bytes > 0 {
        setrlimit(Resource::RLIMIT_AS, memory_bytes, memory_bytes)?;
    }
    Ok(())
}

fn drain<R>(reader: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|reader| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = reader.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await {
                debug!(error = %e, "output stream closed early");
            }
            buf
        })
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// A spawned child with its JSON input written and outputs draining.
pub(crate) struct ChildProcess {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// What a finished child left behind.
pub(crate) struct Exited {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
}

impl Exited {
    pub(crate) fn stderr_tail(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = text.lines().rev().take(5).collect();
        lines.into_iter().rev().collect::<Vec<_>>().join("\n")
    }

    /// Generic failure for a non-zero exit.
    pub(crate) fn failure(&self) -> ExecutionFault {
        let tail = self.stderr_tail();
        let detail = match self.status.code() {
            Some(code) if tail.is_empty() => format!("exited with code {code}"),
            Some(code) => format!("exited with code {code}: {tail}"),
            None => format!("terminated: {}", self.status),
        };
        ExecutionFault::Failed {
            detail,
            exit_code: self.status.code(),
        }
    }
}

impl ChildProcess {
    /// Spawn `cmd` with piped stdio and feed it `input` as JSON.
    pub(crate) fn launch(
        boundary: IsolationType,
        mut cmd: Command,
        input: &Value,
    ) -> IsolationResult<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| IsolationError::spawn(boundary, e))?;

        let payload = serde_json::to_vec(input).map_err(|e| IsolationError::spawn(boundary, e))?;
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // The child may exit without reading its input.
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for exit. Cancel-safe until the child has exited.
    pub(crate) async fn finish(&mut self) -> Result<Exited, ExecutionFault> {
        let status = self.child.wait().await.map_err(|e| ExecutionFault::Failed {
            detail: format!("failed to wait for child: {e}"),
            exit_code: None,
        })?;
        let stdout = collect(self.stdout.take()).await;
        let stderr = collect(self.stderr.take()).await;
        Ok(Exited {
            status,
            stdout,
            stderr,
        })
    }

    /// SIGKILL the child and reap it.
    pub(crate) async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "child already gone");
        }
    }
}

struct SubprocessRunning {
    process: ChildProcess,
}

#[cfg(unix)]
fn cpu_exhausted(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(nix::sys::signal::Signal::SIGXCPU as i32)
}

#[cfg(not(unix))]
fn cpu_exhausted(_status: ExitStatus) -> bool {
    false
}

fn memory_exhausted(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    text.contains("cannot allocate memory")
        || text.contains("out of memory")
        || text.contains("memory allocation")
}

#[async_trait]
impl Running for SubprocessRunning {
    async fn wait(&mut self) -> Result<Value, ExecutionFault> {
        let exited = self.process.finish().await?;
        if exited.status.success() {
            return Ok(parse_output(&exited.stdout));
        }
        if cpu_exhausted(exited.status) {
            return Err(ExecutionFault::LimitExceeded {
                resource: "cpu".to_string(),
            });
        }
        if memory_exhausted(&exited.stderr) {
            return Err(ExecutionFault::LimitExceeded {
                resource: "memory".to_string(),
            });
        }
        let fault = exited.failure();
        warn!(error = %fault, "subprocess action failed");
        Err(fault)
    }

    async fn kill(&mut self) {
        self.process.kill().await;
    }
}

#[async_trait]
impl Boundary for SubprocessBoundary {
    fn kind(&self) -> IsolationType {
        IsolationType::Subprocess
    }

    async fn spawn(&self, invocation: &Invocation) -> IsolationResult<Box<dyn Running>> {
        let ActionBody::Command(spec) = &invocation.body else {
            return Err(IsolationError::Unhostable {
                boundary: IsolationType::Subprocess,
            });
        };
        let cmd = Self::build_command(spec, invocation.limits);
        let process = ChildProcess::launch(IsolationType::Subprocess, cmd, &invocation.input)?;
        debug!(
            action_id = %invocation.action_id,
            program = %spec.program,
            pid = ?process.id(),
            "spawned subprocess action"
        );
        Ok(Box::new(SubprocessRunning { process }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use bulwark_core::ActionId;
    use serde_json::json;

    fn shell(script: &str) -> Invocation {
        Invocation {
            action_id: ActionId::new(),
            body: ActionBody::Command(CommandSpec::new("sh").arg("-c").arg(script)),
            input: json!({ "n": 7 }),
            limits: ResourceLimits::default(),
        }
    }

    #[tokio::test]
    async fn test_stdout_json_is_the_result() {
        let mut running = SubprocessBoundary::new()
            .spawn(&shell("cat >/dev/null; echo '{\"ok\":true}'"))
            .await
            .unwrap();
        assert_eq!(running.wait().await.unwrap(), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_input_arrives_on_stdin() {
        let mut running = SubprocessBoundary::new().spawn(&shell("cat")).await.unwrap();
        assert_eq!(running.wait().await.unwrap(), json!({ "n": 7 }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_fault() {
        let mut running = SubprocessBoundary::new()
            .spawn(&shell("echo broken >&2; exit 3"))
            .await
            .unwrap();
        let fault = running.wait().await.unwrap_err();
        assert_eq!(
            fault,
            ExecutionFault::Failed {
                detail: "exited with code 3: broken".to_string(),
                exit_code: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        let mut invocation = shell("echo \"$PATH:${CARGO_PKG_NAME:-unset}:$EXTRA\"");
        if let ActionBody::Command(spec) = &mut invocation.body {
            spec.env.insert("EXTRA".to_string(), "given".to_string());
        }
        let mut running = SubprocessBoundary::new().spawn(&invocation).await.unwrap();
        assert_eq!(
            running.wait().await.unwrap(),
            json!("/usr/bin:/bin:/usr/local/bin:unset:given")
        );
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let invocation = Invocation {
            action_id: ActionId::new(),
            body: ActionBody::Command(CommandSpec::new("/definitely/not/here")),
            input: Value::Null,
            limits: ResourceLimits::default(),
        };
        let err = SubprocessBoundary::new().spawn(&invocation).await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_kill_terminates() {
        let mut running = SubprocessBoundary::new().spawn(&shell("exec sleep 30")).await.unwrap();
        running.kill().await;
        assert!(running.wait().await.is_err());
    }
}
