//! Core types for mft-engine

use serde::{Deserialize, Serialize};

/// Unique identifier of a persisted transfer record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub i64);

impl TransferId {
    /// Create a new TransferId
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

impl From<i64> for TransferId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TransferId> for i64 {
    fn from(id: TransferId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransferId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Persisted phase marker of a transfer, used to resume without redoing
/// phases that already finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
    /// Pre-transfer tasks
    PreTask,
    /// Data phase
    TransferTask,
    /// Post-transfer tasks (data already moved)
    PostTask,
    /// Everything finished
    AllDoneTask,
    /// Error tasks
    ErrorTask,
}

impl TransferStep {
    /// Convert the persisted ordinal to a TransferStep
    pub fn from_i32(step: i32) -> Option<Self> {
        match step {
            0 => Some(TransferStep::PreTask),
            1 => Some(TransferStep::TransferTask),
            2 => Some(TransferStep::PostTask),
            3 => Some(TransferStep::AllDoneTask),
            4 => Some(TransferStep::ErrorTask),
            _ => None,
        }
    }

    /// Convert to the persisted ordinal
    pub fn to_i32(&self) -> i32 {
        match self {
            TransferStep::PreTask => 0,
            TransferStep::TransferTask => 1,
            TransferStep::PostTask => 2,
            TransferStep::AllDoneTask => 3,
            TransferStep::ErrorTask => 4,
        }
    }
}

/// Outcome codes shared with the remote partner
///
/// Each code has a stable one-character wire representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transfer initialized
    InitOk,
    /// Data phase finished
    TransferOk,
    /// Post-processing finished
    PostProcessingOk,
    /// Whole request finished successfully
    CompleteOk,
    /// Finished with a non-fatal task outcome
    Warning,
    /// Remote host could not be reached
    ConnectionImpossible,
    /// Error reported by an external operation
    ExternalOp,
    /// Data phase or handshake failure
    TransferError,
    /// Task command is missing or not executable
    CommandNotFound,
    /// File to transfer does not exist
    FileNotFound,
    /// Local system or I/O fault
    Internal,
    /// Error reported by the remote partner
    RemoteError,
    /// Local side shutting down
    Shutdown,
    /// Transfer stopped, may be restarted
    StoppedTransfer,
    /// Transfer canceled, will not be restarted
    CanceledTransfer,
    /// Unknown state
    Unknown,
}

impl ErrorCode {
    /// One-character wire code
    pub fn code(&self) -> char {
        match self {
            ErrorCode::InitOk => 'i',
            ErrorCode::TransferOk => 'X',
            ErrorCode::PostProcessingOk => 'P',
            ErrorCode::CompleteOk => 'O',
            ErrorCode::Warning => 'W',
            ErrorCode::ConnectionImpossible => 'C',
            ErrorCode::ExternalOp => 'E',
            ErrorCode::TransferError => 'T',
            ErrorCode::CommandNotFound => 'c',
            ErrorCode::FileNotFound => 'f',
            ErrorCode::Internal => 'I',
            ErrorCode::RemoteError => 'R',
            ErrorCode::Shutdown => 'S',
            ErrorCode::StoppedTransfer => 'H',
            ErrorCode::CanceledTransfer => 'K',
            ErrorCode::Unknown => '-',
        }
    }

    /// Parse a wire code, falling back to `Unknown`
    pub fn from_code(code: char) -> Self {
        match code {
            'i' => ErrorCode::InitOk,
            'X' => ErrorCode::TransferOk,
            'P' => ErrorCode::PostProcessingOk,
            'O' => ErrorCode::CompleteOk,
            'W' => ErrorCode::Warning,
            'C' => ErrorCode::ConnectionImpossible,
            'E' => ErrorCode::ExternalOp,
            'T' => ErrorCode::TransferError,
            'c' => ErrorCode::CommandNotFound,
            'f' => ErrorCode::FileNotFound,
            'I' => ErrorCode::Internal,
            'R' => ErrorCode::RemoteError,
            'S' => ErrorCode::Shutdown,
            'H' => ErrorCode::StoppedTransfer,
            'K' => ErrorCode::CanceledTransfer,
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether this code denotes a successful outcome
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ErrorCode::InitOk
                | ErrorCode::TransferOk
                | ErrorCode::PostProcessingOk
                | ErrorCode::CompleteOk
                | ErrorCode::Warning
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A block of file data pushed through the network layer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataBlock {
    /// Payload bytes (empty for the EOF marker)
    pub data: Vec<u8>,
    /// Set on the last block of a transfer
    pub eof: bool,
}

impl DataBlock {
    /// Data block carrying `data`
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, eof: false }
    }

    /// End-of-file marker block
    pub fn eof() -> Self {
        Self {
            data: Vec::new(),
            eof: true,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Wire-level control messages exchanged around the data phase
///
/// Encoding is owned by the network collaborator; only the fields matter here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Request completion acknowledgement carrying the final code
    EndRequest {
        /// Completion code
        code: ErrorCode,
    },
    /// Error notification
    Error {
        /// Human readable message
        message: String,
        /// Error code
        code: ErrorCode,
        /// Ask the partner to forward the error and close
        forward_close: bool,
    },
    /// End-of-transfer marker appended after the last data block
    EndTransfer,
}

impl ControlMessage {
    /// The error message sent when a transfer fails
    pub fn transfer_error() -> Self {
        ControlMessage::Error {
            message: "Transfer in error".to_string(),
            code: ErrorCode::TransferError,
            forward_close: true,
        }
    }
}

/// States of a [`TransferRunner`](crate::transfer::TransferRunner)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Checking whether the data phase must run
    Starting,
    /// Pumping file blocks
    Streaming,
    /// Waiting for the end-of-transfer future
    AwaitingLocalCompletion,
    /// Running the completion handshake
    Reconciling,
    /// Request validated
    Validated,
    /// Request invalidated
    Invalidated,
    /// Runner finished, cleanup hook fired
    Closed,
}

impl RunnerState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            RunnerState::Starting => 0,
            RunnerState::Streaming => 1,
            RunnerState::AwaitingLocalCompletion => 2,
            RunnerState::Reconciling => 3,
            RunnerState::Validated => 4,
            RunnerState::Invalidated => 5,
            RunnerState::Closed => 6,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => RunnerState::Starting,
            1 => RunnerState::Streaming,
            2 => RunnerState::AwaitingLocalCompletion,
            3 => RunnerState::Reconciling,
            4 => RunnerState::Validated,
            5 => RunnerState::Invalidated,
            _ => RunnerState::Closed,
        }
    }
}
