//! External process task
//!
//! Runs the resolved action as a native process (or through an attached
//! [`LocalExecHelper`]), keeps the last non-empty line of its standard output
//! as diagnostic, and classifies the exit status:
//! - `0` success
//! - `1` success, the transfer status is downgraded to `Warning`
//! - anything else failure, with the diagnostic embedded in the error
//!
//! A watchdog kills the process once the configured timeout elapses; the task
//! then reports status `-1` with diagnostic `TimeOut`.

use crate::error::Error;
use crate::future::CompletionFuture;
use crate::retry::retry_once;
use crate::session::TransferSession;
use crate::task::local_exec::LocalExecHelper;
use crate::task::template::resolve_template;
use crate::task::{Task, TaskArgs, TaskType};
use crate::types::ErrorCode;
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Status reported for a process killed by the watchdog
pub const TIMEOUT_STATUS: i32 = -1;

/// Diagnostic reported for a process killed by the watchdog
pub const TIMEOUT_DIAGNOSTIC: &str = "TimeOut";

/// Longest output line kept; longer lines are split at this size
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Spawns configured commands
///
/// The seam exists so spawn failures can be injected; [`NativeLauncher`] is
/// the only production implementation.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `command` as configured
    fn spawn(&self, command: &mut Command) -> std::io::Result<Child>;
}

/// Spawns through the operating system
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeLauncher;

impl ProcessLauncher for NativeLauncher {
    fn spawn(&self, command: &mut Command) -> std::io::Result<Child> {
        command.spawn()
    }
}

enum Exit {
    Status(i32),
    TimedOut,
}

/// How the output reader ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderExit {
    /// Standard output reached EOF
    Eof,
    /// Cancelled because the pipe stayed open after the command ended
    Cancelled,
}

/// Task running an external command and capturing its output
pub struct ExecOutputTask {
    args: TaskArgs,
    session: Arc<TransferSession>,
    launcher: Arc<dyn ProcessLauncher>,
    local_exec: Option<Arc<dyn LocalExecHelper>>,
    future: CompletionFuture,
    #[cfg(test)]
    reader_exit: std::sync::Mutex<Option<ReaderExit>>,
}

impl ExecOutputTask {
    /// Task for `args` within `session`, spawning natively
    pub fn new(args: TaskArgs, session: Arc<TransferSession>) -> Self {
        Self {
            args,
            session,
            launcher: Arc::new(NativeLauncher),
            local_exec: None,
            future: CompletionFuture::cancellable(),
            #[cfg(test)]
            reader_exit: std::sync::Mutex::new(None),
        }
    }

    /// Replace the process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Attach an out-of-process helper, used when `tasks.use_local_exec` is set
    pub fn with_local_exec(mut self, helper: Arc<dyn LocalExecHelper>) -> Self {
        self.local_exec = Some(helper);
        self
    }

    fn spawn_child(&self, program: &str, args: &[String]) -> std::io::Result<Child> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        self.launcher.spawn(&mut command)
    }

    /// Delegate to the helper; `false` when it could not be reached
    async fn run_delegated(&self, helper: &dyn LocalExecHelper, command_line: &str) -> bool {
        let transfer_id = self.session.record().id().0;
        if let Err(e) = helper.connect().await {
            tracing::warn!(transfer_id, error = %e, "local exec helper unreachable, running natively");
            return false;
        }

        tracing::debug!(transfer_id, command = %command_line, "delegating to local exec helper");
        let outcome = helper.run_command(command_line, self.args.timeout).await;
        helper.disconnect().await;

        match outcome {
            Ok(result) => self.finalize(result.status, result.last_line()).await,
            Err(e) => {
                tracing::error!(transfer_id, error = %e, "local exec helper failed");
                let code = e.code();
                self.future.set_failure(e, Some(self.session.result(code)));
            }
        }
        true
    }

    async fn run_native(&self, program: &str, args: &[String]) {
        let transfer_id = self.session.record().id().0;
        let tasks = &self.session.config().tasks;

        let spawned = retry_once(tasks.retry_interval, || {
            let attempt = self.spawn_child(program, args);
            async move { attempt }
        })
        .await;
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(transfer_id, program, error = %e, "cannot start task command");
                self.future.set_failure(
                    Error::system_io(format!("cannot start {}", program), e),
                    Some(self.session.result(ErrorCode::Internal)),
                );
                return;
            }
        };

        let Some(stdout) = child.stdout.take() else {
            if let Err(e) = child.kill().await {
                tracing::warn!(transfer_id, error = %e, "cannot kill task command");
            }
            self.future.set_failure(
                Error::system("standard output of task command not captured"),
                Some(self.session.result(ErrorCode::Internal)),
            );
            return;
        };

        let (last_line_tx, last_line_rx) = watch::channel(String::new());
        let reader_cancel = CancellationToken::new();
        let mut reader = tokio::spawn(drain_output(stdout, last_line_tx, reader_cancel.clone()));

        let exit = self.wait_child(&mut child).await;

        let join_timeout = if self.args.timeout.is_zero() {
            tasks.reader_join_timeout
        } else {
            self.args.timeout
        };
        let reader_exit = match tokio::time::timeout(join_timeout, &mut reader).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                tracing::warn!(transfer_id, error = %e, "output reader failed");
                ReaderExit::Cancelled
            }
            Err(_) => {
                tracing::debug!(transfer_id, "output reader still busy, cancelling it");
                reader_cancel.cancel();
                reader.abort();
                // The pipe is closed once the aborted reader is joined
                let _ = reader.await;
                ReaderExit::Cancelled
            }
        };
        #[cfg(test)]
        {
            *self.reader_exit.lock().unwrap_or_else(|p| p.into_inner()) = Some(reader_exit);
        }
        tracing::debug!(transfer_id, reader = ?reader_exit, "output reader released");
        let last_line = last_line_rx.borrow().clone();

        match exit {
            Ok(Exit::Status(status)) => self.finalize(status, &last_line).await,
            Ok(Exit::TimedOut) => self.finalize(TIMEOUT_STATUS, TIMEOUT_DIAGNOSTIC).await,
            Err(e) => {
                tracing::error!(transfer_id, program, error = %e, "cannot wait for task command");
                self.future.set_failure(
                    Error::system_io(format!("cannot wait for {}", program), e),
                    Some(self.session.result(ErrorCode::Internal)),
                );
            }
        }
    }

    async fn wait_child(&self, child: &mut Child) -> std::io::Result<Exit> {
        let timeout = self.args.timeout;
        if timeout.is_zero() {
            return child.wait().await.map(|status| Exit::Status(exit_code(status)));
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map(|status| Exit::Status(exit_code(status))),
            Err(_) => {
                tracing::warn!(
                    transfer_id = self.session.record().id().0,
                    ?timeout,
                    "task command timed out, killing it"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "cannot kill timed out task command");
                }
                Ok(Exit::TimedOut)
            }
        }
    }

    async fn finalize(&self, status: i32, diagnostic: &str) {
        let transfer_id = self.session.record().id().0;
        match status {
            0 => {
                tracing::info!(transfer_id, "task command succeeded");
                self.future
                    .set_success(Some(self.session.result(ErrorCode::CompleteOk)));
            }
            1 => {
                tracing::warn!(transfer_id, diagnostic, "task command ended with a warning");
                self.session
                    .record()
                    .set_error_status(ErrorCode::Warning)
                    .await;
                self.future
                    .set_success(Some(self.session.result(ErrorCode::Warning)));
            }
            _ => {
                tracing::error!(transfer_id, status, diagnostic, "task command failed");
                self.future.set_failure(
                    Error::Runner(format!("Status: {}\n<ERROR>{}</ERROR>", status, diagnostic)),
                    Some(self.session.result(ErrorCode::ExternalOp)),
                );
            }
        }
    }

    fn command_not_found(&self, program: &str) {
        tracing::error!(
            transfer_id = self.session.record().id().0,
            program,
            "task command is not executable"
        );
        let result = self
            .session
            .result(ErrorCode::CommandNotFound)
            .with_cause(Error::CommandNotFound(program.to_string()));
        self.future.cancel(Some(result));
    }
}

#[async_trait]
impl Task for ExecOutputTask {
    fn task_type(&self) -> TaskType {
        TaskType::ExecOutput
    }

    fn future(&self) -> &CompletionFuture {
        &self.future
    }

    async fn run(&self) {
        let command_line = resolve_template(
            &self.args.action_template,
            &self.session,
            &self.args.transfer_args,
        );
        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            self.future.set_failure(
                Error::Runner("empty task command".to_string()),
                Some(self.session.result(ErrorCode::ExternalOp)),
            );
            return;
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        if self.session.config().tasks.use_local_exec {
            if let Some(helper) = &self.local_exec {
                if self.run_delegated(helper.as_ref(), &command_line).await {
                    return;
                }
            }
        }

        let path = Path::new(program);
        if path.is_absolute() {
            if !is_executable(path).await {
                self.command_not_found(program);
                return;
            }
        } else {
            match which::which(program) {
                Ok(found) => tracing::debug!(program, resolved = %found.display(), "task command found"),
                Err(_) => tracing::warn!(program, "task command not found in PATH"),
            }
        }

        self.run_native(program, &args).await;
    }
}

/// Keep the last non-empty output line until EOF or cancellation
///
/// Lines are decoded lossily and capped at [`MAX_LINE_BYTES`]; only EOF or
/// cancellation ends the drain.
async fn drain_output(
    stdout: ChildStdout,
    last_line: watch::Sender<String>,
    cancel: CancellationToken,
) -> ReaderExit {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        tokio::select! {
            _ = cancel.cancelled() => return ReaderExit::Cancelled,
            read = limited.read_until(b'\n', &mut buf) => match read {
                Ok(0) => return ReaderExit::Eof,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim();
                    if !line.is_empty() {
                        last_line.send_replace(line.to_string());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "stopped reading task output");
                    return ReaderExit::Eof;
                }
            }
        }
    }
}

/// Exit code, or `-1` for a process ended by a signal
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
