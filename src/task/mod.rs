//! Task framework
//!
//! A task is one configured unit of work around the data phase (pre, post,
//! error or rename step). Each task owns exactly one [`CompletionFuture`] and
//! publishes its outcome there; `run` never returns an error.

mod exec;
mod local_exec;
mod rename;
mod template;

pub use exec::{ExecOutputTask, NativeLauncher, ProcessLauncher, TIMEOUT_DIAGNOSTIC, TIMEOUT_STATUS};
pub use local_exec::{LocalExecHelper, LocalExecResult};
pub use rename::RenameTask;
pub use template::resolve_template;

use crate::error::{Error, Result};
use crate::future::CompletionFuture;
use crate::session::TransferSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configured fields of a task
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskArgs {
    /// Command or target template with `#NAME#` and `%s` placeholders
    pub action_template: String,
    /// Watchdog delay; zero disables it
    pub timeout: Duration,
    /// Values filling the `%s` markers, in order
    pub transfer_args: Vec<String>,
}

impl TaskArgs {
    /// Arguments with `template`, no timeout and no transfer arguments
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            action_template: template.into(),
            ..Self::default()
        }
    }

    /// Set the watchdog delay
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the `%s` values
    pub fn with_transfer_args(mut self, transfer_args: Vec<String>) -> Self {
        self.transfer_args = transfer_args;
        self
    }
}

/// Kinds of task the engine knows how to build
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    /// External command with output capture
    ExecOutput,
    /// Rename/move of the transfer file
    Rename,
}

impl TaskType {
    /// Name used in rule definitions
    pub fn name(&self) -> &'static str {
        match self {
            TaskType::ExecOutput => "EXECOUTPUT",
            TaskType::Rename => "RENAME",
        }
    }

    /// Parse a rule definition name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "EXECOUTPUT" => Some(TaskType::ExecOutput),
            "RENAME" => Some(TaskType::Rename),
            _ => None,
        }
    }

    /// Build a task of this type
    pub fn build(self, args: TaskArgs, session: Arc<TransferSession>) -> Box<dyn Task> {
        match self {
            TaskType::ExecOutput => Box::new(ExecOutputTask::new(args, session)),
            TaskType::Rename => Box::new(RenameTask::new(args, session)),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured unit of work with a single completion outcome
#[async_trait]
pub trait Task: Send + Sync {
    /// Kind of the task
    fn task_type(&self) -> TaskType;

    /// Future receiving the outcome of [`run`](Self::run)
    fn future(&self) -> &CompletionFuture;

    /// Execute the task; the outcome is published to [`future`](Self::future)
    async fn run(&self);
}

/// Run `tasks` in order, stopping at the first one that does not succeed
pub async fn run_tasks(tasks: &[Box<dyn Task>]) -> Result<()> {
    for (index, task) in tasks.iter().enumerate() {
        task.run().await;
        let future = task.future();
        if future.is_success() {
            continue;
        }

        tracing::warn!(
            task_type = %task.task_type(),
            index,
            "task pipeline stopped"
        );
        return Err(match future.cause() {
            Some(cause) => Error::Runner(format!(
                "{} task #{} failed: {}",
                task.task_type(),
                index,
                cause
            )),
            None => Error::Cancelled,
        });
    }
    Ok(())
}
