//! In-memory stand-ins for the record store, the network layer and the
//! cleanup hook

use async_trait::async_trait;
use mft_engine::{
    ChannelContext, CompletionFuture, ControlMessage, DataBlock, Error, ErrorCode,
    NetworkChannel, Result, RetrieveEndHook, TransferId, TransferRecord, TransferResult,
    TransferStep,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Transfer record kept in memory
pub struct MemoryRecord {
    step: TransferStep,
    self_requested: bool,
    error_status: Mutex<Option<ErrorCode>>,
    moved: Mutex<Vec<(String, bool)>>,
}

impl MemoryRecord {
    pub fn new(step: TransferStep, self_requested: bool) -> Self {
        Self {
            step,
            self_requested,
            error_status: Mutex::new(None),
            moved: Mutex::new(Vec::new()),
        }
    }

    pub fn error_status(&self) -> Option<ErrorCode> {
        *self.error_status.lock().unwrap()
    }

    pub fn moved(&self) -> Vec<(String, bool)> {
        self.moved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferRecord for MemoryRecord {
    fn id(&self) -> TransferId {
        TransferId::new(1001)
    }

    async fn global_step(&self) -> TransferStep {
        self.step
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

/// How the simulated peer reacts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    /// Accepts the data and acknowledges the end request
    Acknowledging,
    /// Accepts the data but never acknowledges
    Silent,
    /// Rejects the data once the end marker arrives
    Rejecting,
}

/// Network channel that becomes unwritable after every block and recovers
/// shortly after, signalling through `write_ready`
pub struct RecordingChannel {
    peer: Peer,
    throttle: bool,
    writable: Arc<AtomicBool>,
    ready: Arc<Notify>,
    violations: AtomicU32,
    blocks: Mutex<Vec<DataBlock>>,
    controls: Mutex<Vec<ControlMessage>>,
    closed: AtomicU32,
    end_transfer: Mutex<Option<CompletionFuture>>,
    request: Mutex<Option<CompletionFuture>>,
}

impl RecordingChannel {
    pub fn new(peer: Peer, throttle: bool) -> Self {
        Self {
            peer,
            throttle,
            writable: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(Notify::new()),
            violations: AtomicU32::new(0),
            blocks: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            closed: AtomicU32::new(0),
            end_transfer: Mutex::new(None),
            request: Mutex::new(None),
        }
    }

    /// Complete the futures of `ctx` as the transport and the peer would
    pub fn attach(&self, ctx: &ChannelContext) {
        *self.end_transfer.lock().unwrap() = Some(ctx.future_end_transfer().clone());
        *self.request.lock().unwrap() = Some(ctx.future_request().clone());
    }

    pub fn blocks(&self) -> Vec<DataBlock> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn received_bytes(&self) -> Vec<u8> {
        self.blocks()
            .into_iter()
            .flat_map(|block| block.data)
            .collect()
    }

    pub fn controls(&self) -> Vec<ControlMessage> {
        self.controls.lock().unwrap().clone()
    }

    pub fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    fn end_of_data(&self) {
        let Some(end) = self.end_transfer.lock().unwrap().take() else {
            return;
        };
        match self.peer {
            Peer::Rejecting => {
                end.set_failure(
                    Error::Transfer("partner refused the file".to_string()),
                    Some(TransferResult::new(ErrorCode::RemoteError)),
                );
            }
            Peer::Acknowledging | Peer::Silent => {
                end.set_success(Some(TransferResult::new(ErrorCode::TransferOk)));
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
impl NetworkChannel for RecordingChannel {
    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    async fn write_ready(&self) {
        self.ready.notified().await
    }

    fn write_block(&self, block: DataBlock) -> Result<CompletionFuture> {
        if !self.writable.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let eof = block.eof;
        self.blocks.lock().unwrap().push(block);

        if self.throttle && !eof {
            self.writable.store(false, Ordering::SeqCst);
            let writable = self.writable.clone();
            let ready = self.ready.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                writable.store(true, Ordering::SeqCst);
                ready.notify_waiters();
            });
        }
        if eof {
            self.end_of_data();
        }
        Ok(Self::flushed())
    }

    fn write_control(&self, message: ControlMessage) -> Result<CompletionFuture> {
        self.controls.lock().unwrap().push(message.clone());
        match message {
            ControlMessage::EndTransfer => self.end_of_data(),
            ControlMessage::EndRequest { code } if self.peer == Peer::Acknowledging => {
                if let Some(request) = self.request.lock().unwrap().take() {
                    request.set_success(Some(TransferResult::new(code)));
                }
            }
            _ => {}
        }
        Ok(Self::flushed())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts end-of-retrieve notifications
#[derive(Default)]
pub struct CountingHook {
    calls: AtomicU32,
}

impl CountingHook {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RetrieveEndHook for CountingHook {
    fn retrieve_ended(&self, _channel: &ChannelContext) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
