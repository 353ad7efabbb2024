//! Out-of-process execution helper
//!
//! When enabled in [`TaskConfig`](crate::config::TaskConfig) and attached to a
//! task, commands are delegated to a long-running helper instead of being
//! spawned by this process. The helper reports the raw exit status and the
//! captured output; classification stays with the task.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome reported by a [`LocalExecHelper`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalExecResult {
    /// Raw exit status of the command
    pub status: i32,
    /// Captured standard output
    pub output: String,
}

impl LocalExecResult {
    /// Last non-empty line of the captured output
    pub fn last_line(&self) -> &str {
        self.output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// Client of an out-of-process command executor
#[async_trait]
pub trait LocalExecHelper: Send + Sync {
    /// Open a connection to the helper; an error makes the task run the
    /// command natively
    async fn connect(&self) -> Result<()>;

    /// Execute `command` (already resolved, arguments separated by whitespace)
    ///
    /// A zero `timeout` means no limit.
    async fn run_command(&self, command: &str, timeout: Duration) -> Result<LocalExecResult>;

    /// Release the connection
    async fn disconnect(&self);
}
