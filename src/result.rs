//! Transfer outcome payload carried by completion futures

use crate::error::Error;
use crate::session::SessionInfo;
use crate::types::{ControlMessage, ErrorCode, TransferId};
use std::sync::Arc;

/// Outcome of a transfer or task, published as a [`CompletionFuture`] result
///
/// [`CompletionFuture`]: crate::future::CompletionFuture
#[derive(Clone, Debug)]
pub struct TransferResult {
    /// Session the outcome belongs to
    pub session: Option<Arc<SessionInfo>>,
    /// Whether the peer has already been told about this outcome
    pub is_answered: bool,
    /// Outcome code
    pub code: ErrorCode,
    /// Persisted transfer record this outcome refers to
    pub runner: Option<TransferId>,
    /// Error behind a failed outcome
    pub cause: Option<Arc<Error>>,
    /// Packet attached to the outcome, such as the error sent to the peer
    pub attachment: Option<ControlMessage>,
}

impl TransferResult {
    /// Outcome with `code` and nothing else attached
    pub fn new(code: ErrorCode) -> Self {
        Self {
            session: None,
            is_answered: false,
            code,
            runner: None,
            cause: None,
            attachment: None,
        }
    }

    /// Outcome built from an error, using the error's own code
    pub fn from_error(error: Error) -> Self {
        let code = error.code();
        Self::new(code).with_cause(error)
    }

    /// Attach the session
    pub fn with_session(mut self, session: Arc<SessionInfo>) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach the transfer record reference
    pub fn with_runner(mut self, runner: Option<TransferId>) -> Self {
        self.runner = runner;
        self
    }

    /// Attach the failure cause
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Mark whether the peer was already notified
    pub fn answered(mut self, is_answered: bool) -> Self {
        self.is_answered = is_answered;
        self
    }

    /// Attach a packet
    pub fn with_attachment(mut self, attachment: ControlMessage) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

impl std::fmt::Display for TransferResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Result: {} answered={}", self.code, self.is_answered)?;
        if let Some(runner) = self.runner {
            write!(f, " transfer={}", runner)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " cause={}", cause)?;
        }
        Ok(())
    }
}
