//! Transfer session and the narrow contracts of its external collaborators
//!
//! Persistent record storage, the wire codec and the connection layer live
//! outside this crate. They are consumed through the traits below:
//! - [`TransferRecord`] - persisted step, status and file bookkeeping
//! - [`NetworkChannel`] - writability and block/control-message submission
//! - [`TransferFile`] - block production and file renaming
//! - [`RetrieveEndHook`] - cleanup notification once a retrieve attempt ended

use crate::config::Config;
use crate::error::{Error, Result};
use crate::future::CompletionFuture;
use crate::result::TransferResult;
use crate::types::{ControlMessage, DataBlock, ErrorCode, TransferId, TransferStep};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Persisted transfer record
#[async_trait]
pub trait TransferRecord: Send + Sync {
    /// Identifier of the record
    fn id(&self) -> TransferId;

    /// Last global step reached by the transfer
    async fn global_step(&self) -> TransferStep;

    /// Store the execution status code
    async fn set_error_status(&self, code: ErrorCode);

    /// Record that the transfer file was moved/renamed to `name`
    async fn mark_file_moved(&self, name: &str, ok: bool);

    /// Whether the local side is also the original requester
    fn is_self_requested(&self) -> bool;
}

/// Network channel carrying one transfer
///
/// Writes return a [`CompletionFuture`] completed by the transport once the
/// write is flushed (or failed). An `Err` means the message could not even be
/// handed to the transport.
#[async_trait]
pub trait NetworkChannel: Send + Sync {
    /// Whether the transport currently accepts more data
    fn is_writable(&self) -> bool;

    /// Resolves when the transport signals a writability change
    ///
    /// Transports without such a signal keep the default, which never
    /// resolves; callers then fall back to polling [`is_writable`](Self::is_writable).
    async fn write_ready(&self) {
        std::future::pending::<()>().await
    }

    /// Submit a data block
    fn write_block(&self, block: DataBlock) -> Result<CompletionFuture>;

    /// Submit a control message
    fn write_control(&self, message: ControlMessage) -> Result<CompletionFuture>;

    /// Close the underlying connection
    fn close(&self);
}

/// How block production ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrieveOutcome {
    /// Every block and the end-of-file block were submitted
    Completed,
    /// Production stopped on request before end of file
    Stopped,
}

/// File side of a transfer
#[async_trait]
pub trait TransferFile: Send + Sync {
    /// Produce blocks until EOF or until `cancel` fires, submitting each one
    /// through [`write_when_possible`](crate::transfer::write_when_possible)
    async fn retrieve_blocking(
        &self,
        session: &TransferSession,
        cancel: &CancellationToken,
    ) -> Result<RetrieveOutcome>;

    /// Rename the file to `name`; moving across directories requires `move_allowed`
    async fn replace_filename(&self, name: &str, move_allowed: bool) -> Result<()>;

    /// Current full path of the file
    fn true_path(&self) -> PathBuf;
}

/// Cleanup notification sent once a retrieve attempt ended
pub trait RetrieveEndHook: Send + Sync {
    /// Called exactly once per runner, as its last step
    fn retrieve_ended(&self, channel: &ChannelContext);
}

/// Read-only session facts used for task placeholder resolution and reporting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Local host identifier
    pub local_host: String,
    /// Remote host identifier
    pub remote_host: String,
    /// Transfer rule name
    pub rule: String,
    /// Full path of the file as originally requested
    pub original_path: String,
}

/// Per-connection state shared by the transport callbacks and the runner
///
/// Holds the end-of-transfer future (completed by the send path once the last
/// block and the end marker were flushed) and the request future (completed
/// when the whole request is validated or invalidated).
pub struct ChannelContext {
    channel: Arc<dyn NetworkChannel>,
    future_end_transfer: CompletionFuture,
    future_request: CompletionFuture,
    request_done: AtomicBool,
}

impl ChannelContext {
    /// Wrap a network channel with fresh futures
    pub fn new(channel: Arc<dyn NetworkChannel>) -> Self {
        Self {
            channel,
            future_end_transfer: CompletionFuture::new(),
            future_request: CompletionFuture::new(),
            request_done: AtomicBool::new(false),
        }
    }

    /// Underlying network channel
    pub fn channel(&self) -> &Arc<dyn NetworkChannel> {
        &self.channel
    }

    /// Completed once the data phase is flushed or failed
    pub fn future_end_transfer(&self) -> &CompletionFuture {
        &self.future_end_transfer
    }

    /// Completed once the whole request is validated or invalidated
    pub fn future_request(&self) -> &CompletionFuture {
        &self.future_request
    }

    /// Mark the request as validated with `result`
    pub fn validate_request(&self, result: TransferResult) -> bool {
        self.future_request.set_success(Some(result))
    }

    /// Mark the request as failed with `result`
    pub fn invalidate_request(&self, result: TransferResult) -> bool {
        let cause = result.cause.clone().unwrap_or_else(|| {
            Arc::new(Error::Transfer(format!("request invalidated: {}", result.code)))
        });
        self.future_request.set_failure_shared(cause, Some(result))
    }

    /// Record that the end-request acknowledgement was sent
    pub fn request_is_done(&self) {
        self.request_done.store(true, Ordering::SeqCst);
    }

    /// Whether the end-request acknowledgement was sent
    pub fn is_request_done(&self) -> bool {
        self.request_done.load(Ordering::SeqCst)
    }

    /// Write a control message and wait until the transport flushed it
    pub async fn send_control(&self, message: ControlMessage) -> Result<()> {
        let write = self.channel.write_control(message)?;
        write.wait().await;
        match write.cause() {
            Some(cause) => Err(Error::Packet(cause.to_string())),
            None => Ok(()),
        }
    }

    /// Close the underlying connection
    pub fn close(&self) {
        self.channel.close();
    }
}

/// One transfer: record, file, channel and the finalize state
pub struct TransferSession {
    info: Arc<SessionInfo>,
    record: Arc<dyn TransferRecord>,
    file: Arc<dyn TransferFile>,
    channel: Arc<ChannelContext>,
    config: Arc<Config>,
    finalize: Mutex<Option<(bool, ErrorCode)>>,
    abort: CancellationToken,
}

impl TransferSession {
    /// Assemble a session from its collaborators
    pub fn new(
        info: SessionInfo,
        record: Arc<dyn TransferRecord>,
        file: Arc<dyn TransferFile>,
        channel: Arc<ChannelContext>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            info: Arc::new(info),
            record,
            file,
            channel,
            config,
            finalize: Mutex::new(None),
            abort: CancellationToken::new(),
        }
    }

    /// Read-only session facts
    pub fn info(&self) -> &Arc<SessionInfo> {
        &self.info
    }

    /// Persisted transfer record
    pub fn record(&self) -> &Arc<dyn TransferRecord> {
        &self.record
    }

    /// File side of the transfer
    pub fn file(&self) -> &Arc<dyn TransferFile> {
        &self.file
    }

    /// Channel context of the transfer
    pub fn channel(&self) -> &Arc<ChannelContext> {
        &self.channel
    }

    /// Engine configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Interrupt every wait of this session (writability waits included)
    ///
    /// Unlike stopping a runner, this aborts in-flight block submission.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Token cancelled by [`abort`](Self::abort)
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// A result pre-filled with this session and record
    pub fn result(&self, code: ErrorCode) -> TransferResult {
        TransferResult::new(code)
            .with_session(self.info.clone())
            .with_runner(Some(self.record.id()))
    }

    /// Record the final state of the transfer; the first call wins
    ///
    /// A failure also stores the code on the record and invalidates the request.
    pub async fn set_finalize_transfer(&self, success: bool, result: TransferResult) {
        if !self.claim_finalize(success, result.code) {
            return;
        }

        if success {
            tracing::info!(transfer_id = self.record.id().0, code = %result.code, "transfer finalized");
            return;
        }

        tracing::warn!(
            transfer_id = self.record.id().0,
            code = %result.code,
            "transfer finalized in error"
        );
        self.record.set_error_status(result.code).await;
        self.channel.invalidate_request(result);
    }

    /// Failure finalization usable where nothing can be awaited
    ///
    /// Invalidates the request right away. The record status update is
    /// spawned on the current runtime, and skipped when none is running.
    /// Returns `false` when the transfer was already finalized.
    pub fn finalize_detached(&self, result: TransferResult) -> bool {
        if !self.claim_finalize(false, result.code) {
            return false;
        }

        let code = result.code;
        tracing::warn!(
            transfer_id = self.record.id().0,
            code = %code,
            "transfer finalized in error without completing"
        );
        self.channel.invalidate_request(result);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let record = self.record.clone();
                handle.spawn(async move { record.set_error_status(code).await });
            }
            Err(_) => tracing::warn!(
                transfer_id = self.record.id().0,
                "no runtime left, record status not updated"
            ),
        }
        true
    }

    fn claim_finalize(&self, success: bool, code: ErrorCode) -> bool {
        let mut finalize = self
            .finalize
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if finalize.is_some() {
            tracing::debug!(
                transfer_id = self.record.id().0,
                "transfer already finalized"
            );
            return false;
        }
        *finalize = Some((success, code));
        true
    }

    /// Final state recorded by [`set_finalize_transfer`](Self::set_finalize_transfer)
    pub fn finalize_status(&self) -> Option<(bool, ErrorCode)> {
        *self
            .finalize
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
