//! Backpressure-aware block submission
//!
//! Blocks are handed to the channel only when it reports itself writable.
//! While it is not, the writer parks on the channel's writability signal and
//! re-checks at least every `write_poll_interval`, so a transport without a
//! signal still makes progress.

use crate::error::{Error, Result};
use crate::future::CompletionFuture;
use crate::session::TransferSession;
use crate::types::{DataBlock, ErrorCode};

/// Submit `block` as soon as the session's channel accepts writes
///
/// Returns the write future of the submitted block. Blocks submitted by one
/// producer keep their order. If the session is aborted while waiting, the
/// transfer is finalized as failed with an internal error and
/// [`Error::Interrupted`] is returned; the block is not written.
pub async fn write_when_possible(
    block: DataBlock,
    session: &TransferSession,
) -> Result<CompletionFuture> {
    let channel = session.channel().channel();

    if channel.is_writable() {
        return channel.write_block(block);
    }

    let poll = session.config().network.write_poll_interval;
    let abort = session.abort_token();
    let mut waits: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                tracing::warn!(
                    transfer_id = session.record().id().0,
                    waits,
                    "interrupted while waiting for a writable channel"
                );
                let message = "wait for writable channel interrupted";
                session
                    .set_finalize_transfer(
                        false,
                        session
                            .result(ErrorCode::Internal)
                            .with_cause(Error::Interrupted(message.to_string())),
                    )
                    .await;
                return Err(Error::Interrupted(message.to_string()));
            }
            _ = channel.write_ready() => {}
            _ = tokio::time::sleep(poll) => {}
        }

        waits += 1;
        if channel.is_writable() {
            tracing::trace!(waits, len = block.len(), "channel writable again");
            return channel.write_block(block);
        }
    }
}

/// Wrap raw bytes read from a file into a block; `None` marks end of file
pub fn to_data_block(data: Option<Vec<u8>>) -> DataBlock {
    match data {
        Some(data) => DataBlock::new(data),
        None => DataBlock::eof(),
    }
}
