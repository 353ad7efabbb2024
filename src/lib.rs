//! # mft-engine
//!
//! Execution core of a managed file-transfer server: it runs a single
//! transfer and the tasks around it.
//!
//! ## Components
//!
//! - [`CompletionFuture`] - single-assignment completion handle shared between
//!   network callbacks and business logic
//! - [`task`] - pluggable pre/post/error tasks, most notably
//!   [`ExecOutputTask`] running external commands with timeout, single retry
//!   and output capture
//! - [`transfer`] - the retrieve-side [`TransferRunner`] and the backpressure
//!   writer feeding it
//!
//! Record persistence, the wire codec and the connection layer are external
//! collaborators reached through the traits in [`session`].
//!
//! ## Quick Start
//!
//! ```
//! use mft_engine::CompletionFuture;
//!
//! #[tokio::main]
//! async fn main() {
//!     let future = CompletionFuture::new();
//!     let waiter = future.clone();
//!
//!     tokio::spawn(async move {
//!         future.set_success(None);
//!     });
//!
//!     waiter.wait().await;
//!     assert!(waiter.is_success());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Completion handle
pub mod future;
/// Transfer outcome payload
pub mod result;
/// Single-retry policy for transient failures
pub mod retry;
/// Transfer session and collaborator contracts
pub mod session;
/// Task framework
pub mod task;
/// Retrieve-side transfer runner and backpressure writer
pub mod transfer;
/// Core types
pub mod types;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use config::{Config, NetworkConfig, TaskConfig};
pub use error::{Error, Result};
pub use future::CompletionFuture;
pub use result::TransferResult;
pub use session::{
    ChannelContext, NetworkChannel, RetrieveEndHook, RetrieveOutcome, SessionInfo, TransferFile,
    TransferRecord, TransferSession,
};
pub use task::{
    ExecOutputTask, LocalExecHelper, LocalExecResult, ProcessLauncher, RenameTask, Task, TaskArgs,
    TaskType, run_tasks,
};
pub use transfer::{LocalFile, TransferRunner, write_when_possible};
pub use types::{
    ControlMessage, DataBlock, ErrorCode, RunnerState, TransferId, TransferStep,
};
