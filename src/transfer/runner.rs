//! Retrieve-side transfer runner
//!
//! One runner drives one outbound transfer: it streams the file under
//! backpressure (or skips streaming when resuming a transfer whose data phase
//! already finished), waits for the send path to flush the end marker, then
//! reconciles the local outcome with the peer.
//!
//! Every exit path (setup failure, normal completion, panic in the block
//! producer) converges on a single `finalize_once` call, and the cleanup hook
//! fires exactly once as the very last step. A `run` future dropped before it
//! ended (aborted task, runtime shutdown) is finalized in error by a guard.

use crate::error::Error;
use crate::result::TransferResult;
use crate::session::{RetrieveEndHook, RetrieveOutcome, TransferSession};
use crate::types::{ControlMessage, ErrorCode, RunnerState, TransferStep};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

/// How the data phase ended
#[derive(Debug)]
enum DataPhase {
    /// End-of-transfer future is done (successfully or not)
    Completed,
    /// The data phase could not run to completion; notify the peer and fail
    SetupFailed(Error, ErrorCode),
    /// The block producer panicked
    Panicked(String),
}

/// Drives a single outbound transfer to a validated or invalidated request
pub struct TransferRunner {
    session: Arc<TransferSession>,
    end_hook: Arc<dyn RetrieveEndHook>,
    running: CancellationToken,
    started: AtomicBool,
    finalized: AtomicBool,
    closed: AtomicBool,
    state: AtomicU8,
}

/// Finalizes a runner whose `run` future is dropped before it ended
struct AbandonGuard<'a> {
    runner: &'a TransferRunner,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        self.runner.abandon();
    }
}

impl TransferRunner {
    /// Runner for `session`; `end_hook` is told once the attempt is over
    pub fn new(session: Arc<TransferSession>, end_hook: Arc<dyn RetrieveEndHook>) -> Self {
        Self {
            session,
            end_hook,
            running: CancellationToken::new(),
            started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: AtomicU8::new(RunnerState::Starting.to_u8()),
        }
    }

    /// Ask the block producer to stop reading
    ///
    /// Advisory: writes already submitted complete, no further block is read.
    pub fn stop_runner(&self) {
        tracing::info!(
            transfer_id = self.session.record().id().0,
            "stop requested for transfer runner"
        );
        self.running.cancel();
    }

    /// Current state of the runner
    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Session driven by this runner
    pub fn session(&self) -> &Arc<TransferSession> {
        &self.session
    }

    /// Run on a dedicated task
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the transfer to completion
    ///
    /// A runner runs at most once; later calls return immediately.
    pub async fn run(&self) {
        let transfer_id = self.session.record().id().0;
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(transfer_id, "transfer runner already started");
            return;
        }
        let _guard = AbandonGuard { runner: self };

        let phase = match AssertUnwindSafe(self.data_phase()).catch_unwind().await {
            Ok(phase) => phase,
            Err(panic) => DataPhase::Panicked(panic_message(&*panic)),
        };

        if let Err(panic) = AssertUnwindSafe(self.finalize_once(phase))
            .catch_unwind()
            .await
        {
            tracing::error!(
                transfer_id,
                panic = %panic_message(&*panic),
                "transfer finalization panicked"
            );
        }

        self.close();
    }

    /// Fire the cleanup hook and move to `Closed`; only the first call acts
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.end_hook.retrieve_ended(self.session.channel());
        self.set_state(RunnerState::Closed);
        tracing::debug!(
            transfer_id = self.session.record().id().0,
            "transfer runner closed"
        );
    }

    /// Synchronous finalization of a run dropped before it closed
    fn abandon(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let transfer_id = self.session.record().id().0;
        let state = self.state();
        tracing::warn!(transfer_id, ?state, "transfer runner dropped before completion");

        let code = if self.running.is_cancelled() {
            ErrorCode::StoppedTransfer
        } else {
            ErrorCode::Internal
        };
        let cause = Arc::new(Error::Transfer(format!(
            "transfer runner dropped while {:?}",
            state
        )));
        let mut result = self.session.result(code).answered(true);
        result.cause = Some(cause.clone());

        let ctx = self.session.channel();
        ctx.future_end_transfer()
            .set_failure_shared(cause, Some(result.clone()));
        if self.session.finalize_detached(result) {
            ctx.close();
            self.set_state(RunnerState::Invalidated);
        }
        self.close();
    }

    async fn data_phase(&self) -> DataPhase {
        let ctx = self.session.channel();
        let transfer_id = self.session.record().id().0;

        if let Err(e) = self.session.config().validate() {
            tracing::error!(transfer_id, error = %e, "invalid engine configuration");
            return DataPhase::SetupFailed(e, ErrorCode::Internal);
        }

        if self.session.record().global_step().await == TransferStep::PostTask {
            tracing::info!(transfer_id, "data already sent, resuming at end of transfer");
            if let Err(e) = ctx.send_control(ControlMessage::EndTransfer).await {
                tracing::error!(transfer_id, error = %e, "cannot send end of transfer");
                return DataPhase::SetupFailed(e, ErrorCode::TransferError);
            }
        } else {
            self.set_state(RunnerState::Streaming);
            let file = self.session.file().clone();
            match file.retrieve_blocking(&self.session, &self.running).await {
                Ok(RetrieveOutcome::Completed) => {}
                Ok(RetrieveOutcome::Stopped) if !ctx.future_end_transfer().is_done() => {
                    return DataPhase::SetupFailed(
                        Error::Transfer("transfer stopped before end of file".to_string()),
                        ErrorCode::StoppedTransfer,
                    );
                }
                Ok(RetrieveOutcome::Stopped) => {}
                Err(e) => {
                    tracing::error!(transfer_id, error = %e, "error while sending file blocks");
                    return DataPhase::SetupFailed(e, ErrorCode::TransferError);
                }
            }
        }

        self.set_state(RunnerState::AwaitingLocalCompletion);
        ctx.future_end_transfer().wait().await;
        DataPhase::Completed
    }

    async fn finalize_once(&self, phase: DataPhase) {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(
                transfer_id = self.session.record().id().0,
                "transfer runner already finalized"
            );
            return;
        }

        let end_success = self.session.channel().future_end_transfer().is_success();
        match phase {
            DataPhase::SetupFailed(cause, code) => self.transfer_in_error(cause, code).await,
            DataPhase::Panicked(message) if !end_success => {
                tracing::error!(
                    transfer_id = self.session.record().id().0,
                    panic = %message,
                    "block producer panicked"
                );
                self.transfer_in_error(
                    Error::system(format!("block producer panicked: {}", message)),
                    ErrorCode::TransferError,
                )
                .await
            }
            DataPhase::Completed | DataPhase::Panicked(_) if end_success => self.validate().await,
            DataPhase::Completed | DataPhase::Panicked(_) => self.invalidate().await,
        }
    }

    /// Local success: acknowledge the request and wait (bounded) for the peer
    async fn validate(&self) {
        self.set_state(RunnerState::Reconciling);
        let ctx = self.session.channel();
        let transfer_id = self.session.record().id().0;

        if !ctx.is_request_done() {
            let end_request = ControlMessage::EndRequest {
                code: ErrorCode::CompleteOk,
            };
            if let Err(e) = ctx.send_control(end_request).await {
                tracing::warn!(transfer_id, error = %e, "cannot send end request");
            }
            ctx.request_is_done();
        }

        let known = ctx
            .future_end_transfer()
            .result()
            .unwrap_or_else(|| self.session.result(ErrorCode::CompleteOk));

        let wait = self.session.config().network.handshake_wait();
        if !ctx.future_request().wait_timeout(wait).await {
            tracing::warn!(
                transfer_id,
                ?wait,
                "no acknowledgement from peer, validating request locally"
            );
            ctx.validate_request(known.clone());
        }

        if ctx.future_request().is_failed() {
            tracing::warn!(transfer_id, "request invalidated by peer after end of transfer");
            self.set_state(RunnerState::Invalidated);
        } else {
            self.session.set_finalize_transfer(true, known).await;
            self.set_state(RunnerState::Validated);
        }

        if self.session.record().is_self_requested() {
            ctx.close();
        }
    }

    /// Local failure reported through the end-of-transfer future
    async fn invalidate(&self) {
        self.set_state(RunnerState::Reconciling);
        let ctx = self.session.channel();
        let transfer_id = self.session.record().id().0;
        let end = ctx.future_end_transfer();

        let mut result = end
            .result()
            .unwrap_or_else(|| self.session.result(ErrorCode::TransferError));
        if result.cause.is_none() {
            result.cause = end.cause();
        }

        if end.is_done() && !result.is_answered {
            let notice = ControlMessage::transfer_error();
            if let Err(e) = ctx.send_control(notice.clone()).await {
                tracing::warn!(transfer_id, error = %e, "cannot notify peer of transfer error");
            }
            result = result.answered(true).with_attachment(notice);
        }

        tracing::warn!(transfer_id, code = %result.code, "End Retrieve in Error");
        self.session.set_finalize_transfer(false, result).await;
        self.set_state(RunnerState::Invalidated);
    }

    /// Data phase could not complete: tell the peer, fail everything, close
    async fn transfer_in_error(&self, cause: Error, code: ErrorCode) {
        let ctx = self.session.channel();
        let transfer_id = self.session.record().id().0;

        let notice = ControlMessage::transfer_error();
        if let Err(e) = ctx.send_control(notice.clone()).await {
            tracing::warn!(transfer_id, error = %e, "cannot notify peer of transfer error");
        }

        let cause = Arc::new(cause);
        let mut result: TransferResult = self
            .session
            .result(code)
            .answered(true)
            .with_attachment(notice);
        result.cause = Some(cause.clone());

        ctx.future_end_transfer()
            .set_failure_shared(cause.clone(), Some(result.clone()));
        tracing::error!(transfer_id, code = %code, error = %cause, "transfer in error");
        self.session.set_finalize_transfer(false, result).await;
        ctx.close();
        self.set_state(RunnerState::Invalidated);
    }

    fn set_state(&self, state: RunnerState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
