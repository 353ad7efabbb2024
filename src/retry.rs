//! Transient failure classification and the single-retry policy
//!
//! Process spawning is retried at most once, after a fixed interval, and only
//! when the failure carries the platform's "resource temporarily unavailable"
//! or "text file busy" signature. A second consecutive transient failure is
//! terminal.

use crate::error::Error;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (text file busy, resource temporarily unavailable) return `true`.
/// Everything else is permanent.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        #[cfg(unix)]
        {
            if matches!(self.raw_os_error(), Some(code) if code == libc::ETXTBSY || code == libc::EAGAIN)
            {
                return true;
            }
        }
        self.kind() == std::io::ErrorKind::WouldBlock
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => e.is_retryable(),
            Error::System {
                source: Some(e), ..
            } => e.is_retryable(),
            _ => false,
        }
    }
}

/// Run `operation`, retrying exactly once after `interval` if the first
/// attempt fails with a retryable error
pub async fn retry_once<F, Fut, T, E>(interval: Duration, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(e) if e.is_retryable() => {
            tracing::warn!(
                error = %e,
                delay = ?interval,
                "transient failure, retrying once"
            );
            tokio::time::sleep(interval).await;
            operation().await.inspect_err(|e| {
                tracing::error!(error = %e, "operation failed again after retry");
            })
        }
        Err(e) => Err(e),
    }
}
