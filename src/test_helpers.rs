//! Shared test doubles for the collaborator traits.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::future::CompletionFuture;
use crate::session::{
    ChannelContext, NetworkChannel, RetrieveEndHook, RetrieveOutcome, SessionInfo, TransferFile,
    TransferRecord, TransferSession,
};
use crate::transfer::write_when_possible;
use crate::types::{ControlMessage, DataBlock, ErrorCode, TransferId, TransferStep};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Config with short waits so handshake timeouts stay fast in tests
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.network.net_op_timeout = Duration::from_millis(20);
    config.network.write_poll_interval = Duration::from_millis(1);
    config.tasks.retry_interval = Duration::from_millis(5);
    config
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Writability {
    Always,
    /// Flips on every `is_writable` call, starting with "not writable"
    Alternating,
    Never,
}

/// Network channel recording everything written to it
pub(crate) struct MockChannel {
    writability: Writability,
    last_reported: AtomicBool,
    writable_checks: AtomicU32,
    violations: AtomicU32,
    fail_control: AtomicBool,
    blocks: Mutex<Vec<DataBlock>>,
    controls: Mutex<Vec<ControlMessage>>,
    closed: AtomicU32,
    end_transfer: Mutex<Option<(CompletionFuture, bool)>>,
    request_ack: Mutex<Option<Arc<ChannelContext>>>,
}

impl MockChannel {
    pub(crate) fn new(writability: Writability) -> Self {
        Self {
            writability,
            last_reported: AtomicBool::new(matches!(writability, Writability::Alternating)),
            writable_checks: AtomicU32::new(0),
            violations: AtomicU32::new(0),
            fail_control: AtomicBool::new(false),
            blocks: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            closed: AtomicU32::new(0),
            end_transfer: Mutex::new(None),
            request_ack: Mutex::new(None),
        }
    }

    pub(crate) fn writable() -> Self {
        Self::new(Writability::Always)
    }

    /// Make `write_control` fail before reaching the transport
    pub(crate) fn fail_control_writes(&self) {
        self.fail_control.store(true, Ordering::SeqCst);
    }

    /// Complete `future` (success or failure) once the EOF block or the
    /// end-of-transfer marker is written
    pub(crate) fn complete_on_end(&self, future: CompletionFuture, success: bool) {
        *self.end_transfer.lock().unwrap() = Some((future, success));
    }

    /// Validate the request as the peer would once the end-request is written
    pub(crate) fn ack_end_request(&self, ctx: Arc<ChannelContext>) {
        *self.request_ack.lock().unwrap() = Some(ctx);
    }

    pub(crate) fn blocks(&self) -> Vec<DataBlock> {
        self.blocks.lock().unwrap().clone()
    }

    pub(crate) fn controls(&self) -> Vec<ControlMessage> {
        self.controls.lock().unwrap().clone()
    }

    pub(crate) fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn writable_checks(&self) -> u32 {
        self.writable_checks.load(Ordering::SeqCst)
    }

    fn fire_end(&self) {
        if let Some((future, success)) = self.end_transfer.lock().unwrap().take() {
            if success {
                future.set_success(Some(crate::result::TransferResult::new(
                    ErrorCode::TransferOk,
                )));
            } else {
                future.set_failure(
                    Error::Transfer("peer rejected data".into()),
                    Some(crate::result::TransferResult::new(ErrorCode::TransferError)),
                );
            }
        }
    }

    fn flushed() -> CompletionFuture {
        let write = CompletionFuture::new();
        write.set_success(None);
        write
    }
}

#[async_trait]
impl NetworkChannel for MockChannel {
    fn is_writable(&self) -> bool {
        self.writable_checks.fetch_add(1, Ordering::SeqCst);
        let writable = match self.writability {
            Writability::Always => true,
            Writability::Never => false,
            Writability::Alternating => !self.last_reported.load(Ordering::SeqCst),
        };
        self.last_reported.store(writable, Ordering::SeqCst);
        writable
    }

    fn write_block(&self, block: DataBlock) -> Result<CompletionFuture> {
        if !self.last_reported.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let eof = block.eof;
        self.blocks.lock().unwrap().push(block);
        if eof {
            self.fire_end();
        }
        Ok(Self::flushed())
    }

    fn write_control(&self, message: ControlMessage) -> Result<CompletionFuture> {
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(Error::Packet("cannot encode control message".into()));
        }
        let end_request = matches!(message, ControlMessage::EndRequest { .. });
        let end_transfer = matches!(message, ControlMessage::EndTransfer);
        self.controls.lock().unwrap().push(message);
        if end_transfer {
            self.fire_end();
        }
        if end_request {
            if let Some(ctx) = self.request_ack.lock().unwrap().take() {
                ctx.validate_request(crate::result::TransferResult::new(
                    ErrorCode::CompleteOk,
                ));
            }
        }
        Ok(Self::flushed())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transfer record kept in memory
pub(crate) struct MockRecord {
    id: TransferId,
    step: Mutex<TransferStep>,
    error_status: Mutex<Option<ErrorCode>>,
    moved: Mutex<Vec<(String, bool)>>,
    self_requested: bool,
}

impl MockRecord {
    pub(crate) fn new(step: TransferStep, self_requested: bool) -> Self {
        Self {
            id: TransferId(42),
            step: Mutex::new(step),
            error_status: Mutex::new(None),
            moved: Mutex::new(Vec::new()),
            self_requested,
        }
    }

    pub(crate) fn error_status(&self) -> Option<ErrorCode> {
        *self.error_status.lock().unwrap()
    }

    pub(crate) fn moved(&self) -> Vec<(String, bool)> {
        self.moved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferRecord for MockRecord {
    fn id(&self) -> TransferId {
        self.id
    }

    async fn global_step(&self) -> TransferStep {
        *self.step.lock().unwrap()
    }

    async fn set_error_status(&self, code: ErrorCode) {
        *self.error_status.lock().unwrap() = Some(code);
    }

    async fn mark_file_moved(&self, name: &str, ok: bool) {
        self.moved.lock().unwrap().push((name.to_string(), ok));
    }

    fn is_self_requested(&self) -> bool {
        self.self_requested
    }
}

#[derive(Clone, Debug)]
pub(crate) enum FileBehavior {
    /// Submit these blocks then the EOF block
    Blocks(Vec<Vec<u8>>),
    /// Fail before producing anything
    Fail,
    /// Panic in the middle of the stream
    Panic,
    /// Submit these blocks and the EOF block, then get stopped
    StoppedAfterEof(Vec<Vec<u8>>),
}

/// File producing canned blocks
pub(crate) struct MockFile {
    behavior: FileBehavior,
    retrieve_calls: AtomicU32,
    fail_rename: bool,
    path: Mutex<PathBuf>,
}

impl MockFile {
    pub(crate) fn new(behavior: FileBehavior) -> Self {
        Self {
            behavior,
            retrieve_calls: AtomicU32::new(0),
            fail_rename: false,
            path: Mutex::new(PathBuf::from("/data/out/report.csv")),
        }
    }

    pub(crate) fn failing_rename() -> Self {
        Self {
            fail_rename: true,
            ..Self::new(FileBehavior::Blocks(Vec::new()))
        }
    }

    pub(crate) fn retrieve_calls(&self) -> u32 {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferFile for MockFile {
    async fn retrieve_blocking(
        &self,
        session: &TransferSession,
        cancel: &CancellationToken,
    ) -> Result<RetrieveOutcome> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            FileBehavior::Blocks(blocks) => {
                for data in blocks {
                    if cancel.is_cancelled() {
                        return Ok(RetrieveOutcome::Stopped);
                    }
                    write_when_possible(DataBlock::new(data.clone()), session).await?;
                }
                write_when_possible(DataBlock::eof(), session).await?;
                Ok(RetrieveOutcome::Completed)
            }
            FileBehavior::StoppedAfterEof(blocks) => {
                for data in blocks {
                    write_when_possible(DataBlock::new(data.clone()), session).await?;
                }
                write_when_possible(DataBlock::eof(), session).await?;
                cancel.cancel();
                Ok(RetrieveOutcome::Completed)
            }
            FileBehavior::Fail => Err(Error::Transfer("cannot read source file".into())),
            FileBehavior::Panic => panic!("block producer crashed"),
        }
    }

    async fn replace_filename(&self, name: &str, _move_allowed: bool) -> Result<()> {
        if self.fail_rename {
            return Err(Error::system_io(
                format!("cannot rename to {}", name),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ));
        }
        *self.path.lock().unwrap() = PathBuf::from(name);
        Ok(())
    }

    fn true_path(&self) -> PathBuf {
        self.path.lock().unwrap().clone()
    }
}

/// Counts cleanup notifications
#[derive(Default)]
pub(crate) struct MockHook {
    calls: AtomicU32,
}

impl MockHook {
    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RetrieveEndHook for MockHook {
    fn retrieve_ended(&self, _channel: &ChannelContext) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A session wired to mocks, with handles to inspect each of them
pub(crate) struct TestSession {
    pub(crate) session: Arc<TransferSession>,
    pub(crate) record: Arc<MockRecord>,
    pub(crate) channel: Arc<MockChannel>,
    pub(crate) file: Arc<MockFile>,
    pub(crate) hook: Arc<MockHook>,
}

pub(crate) fn test_session() -> TestSession {
    test_session_with(
        MockRecord::new(TransferStep::TransferTask, false),
        MockChannel::writable(),
        MockFile::new(FileBehavior::Blocks(vec![b"hello".to_vec()])),
    )
}

pub(crate) fn test_session_with(
    record: MockRecord,
    channel: MockChannel,
    file: MockFile,
) -> TestSession {
    let record = Arc::new(record);
    let channel = Arc::new(channel);
    let file = Arc::new(file);
    let ctx = Arc::new(ChannelContext::new(channel.clone()));
    let session = Arc::new(TransferSession::new(
        SessionInfo {
            local_host: "hostA".to_string(),
            remote_host: "hostB".to_string(),
            rule: "send-reports".to_string(),
            original_path: "/data/in/report.csv".to_string(),
        },
        record.clone(),
        file.clone(),
        ctx,
        Arc::new(fast_config()),
    ));
    TestSession {
        session,
        record,
        channel,
        file,
        hook: Arc::new(MockHook::default()),
    }
}
