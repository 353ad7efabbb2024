//! Error types for mft-engine
//!
//! Every error maps onto an [`ErrorCode`] so it can be reported to the remote
//! partner and stored on the transfer record.

use crate::types::ErrorCode;
use thiserror::Error;

/// Result type alias for mft-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mft-engine
#[derive(Debug, Error)]
pub enum Error {
    /// Task command does not exist or is not executable; nothing was spawned
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Data phase or handshake failure
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Task execution failed; the message embeds the captured diagnostic
    #[error("task error: {0}")]
    Runner(String),

    /// Local system fault (pipe setup, interrupted wait, file I/O)
    #[error("system error: {message}")]
    System {
        /// Human-readable description
        message: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// A control message or data block could not be handed to the network layer
    #[error("packet error: {0}")]
    Packet(String),

    /// A wait was interrupted by cancellation
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Operation was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// System error without an underlying I/O source
    pub fn system(message: impl Into<String>) -> Self {
        Error::System {
            message: message.into(),
            source: None,
        }
    }

    /// System error wrapping an I/O error
    pub fn system_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::System {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Outcome code reported for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::CommandNotFound(_) => ErrorCode::CommandNotFound,
            Error::Transfer(_) | Error::Packet(_) => ErrorCode::TransferError,
            Error::Runner(_) => ErrorCode::ExternalOp,
            Error::System { .. } | Error::Interrupted(_) | Error::Io(_) | Error::Config { .. } => {
                ErrorCode::Internal
            }
            Error::Cancelled => ErrorCode::CanceledTransfer,
            Error::Other(_) => ErrorCode::Unknown,
        }
    }
}
