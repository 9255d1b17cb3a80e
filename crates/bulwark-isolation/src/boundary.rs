//! Boundary abstractions and what runs inside them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_core::{ActionId, IsolationType, ResourceLimits};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExecutionFault, IsolationResult};

/// An in-process action body.
///
/// Only hostable by an inline boundary; the guard refuses it when the
/// effective boundary is stronger.
#[async_trait]
pub trait InlineAction: Send + Sync {
    /// Run the action on `input`. An `Err` is reported as a fault.
    async fn run(&self, input: Value) -> Result<Value, String>;
}

/// An external program to run as the action body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program path or name resolved on `PATH`.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container image, required for container boundaries.
    #[serde(default)]
    pub image: Option<String>,
}

impl CommandSpec {
    /// A command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the container image.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// What an action runs.
#[derive(Clone)]
pub enum ActionBody {
    /// An in-process async closure.
    Inline(Arc<dyn InlineAction>),
    /// An external command.
    Command(CommandSpec),
}

impl ActionBody {
    /// Wrap an in-process action.
    pub fn inline(action: impl InlineAction + 'static) -> Self {
        Self::Inline(Arc::new(action))
    }
}

impl fmt::Debug for ActionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(..)"),
            Self::Command(spec) => f.debug_tuple("Command").field(spec).finish(),
        }
    }
}

/// One execution handed to a boundary.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The action being run; container names derive from it.
    pub action_id: ActionId,
    /// What to run.
    pub body: ActionBody,
    /// JSON input (stdin for process boundaries).
    pub input: Value,
    /// Ceilings enforced by the boundary.
    pub limits: ResourceLimits,
}

/// A spawned execution.
#[async_trait]
pub trait Running: Send {
    /// Wait for the execution to finish. Must be cancel-safe: dropping the
    /// future leaves the execution running so it can be killed.
    async fn wait(&mut self) -> Result<Value, ExecutionFault>;

    /// Forcefully terminate the execution.
    async fn kill(&mut self);
}

/// An isolation boundary that can host executions.
#[async_trait]
pub trait Boundary: Send + Sync {
    /// The isolation this boundary provides.
    fn kind(&self) -> IsolationType;

    /// Start `invocation` inside the boundary with its limits attached.
    async fn spawn(&self, invocation: &Invocation) -> IsolationResult<Box<dyn Running>>;
}

/// Interpret captured stdout as the action result: empty is `null`,
/// valid JSON is parsed, anything else is returned as a string.
pub(crate) fn parse_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
