//! Single-assignment completion handle
//!
//! A [`CompletionFuture`] is created per logical operation (one per transfer,
//! one per task invocation, one per network write) and transitions exactly
//! once to success, failure or cancellation. Network callbacks and business
//! logic communicate only through these transitions.
//!
//! Transitions after the first are ignored: they return `false` and leave the
//! stored outcome untouched. Observers registered with
//! [`add_listener`](CompletionFuture::add_listener) run synchronously on the
//! completing thread before any waiter is released.
//!
//! Waiting is available both as async (`wait`, `wait_timeout`) and blocking
//! (`wait_blocking`, `wait_blocking_timeout`) for callers outside the runtime.
//! The untimed waits cannot be interrupted; only dropping the future of an
//! async wait abandons it.

use crate::error::Error;
use crate::result::TransferResult;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

type Listener = Box<dyn FnOnce(&CompletionFuture) + Send>;

#[derive(Clone, Debug)]
enum Outcome {
    Success,
    Failure(Arc<Error>),
    Cancelled,
}

struct State {
    outcome: Option<Outcome>,
    result: Option<TransferResult>,
    listeners: Vec<Listener>,
    /// Set once listeners have run; waiters only return after this
    released: bool,
}

struct Inner {
    cancellable: bool,
    state: Mutex<State>,
    blocking_waiters: Condvar,
    released_tx: watch::Sender<bool>,
}

/// Cancellable, single-assignment completion handle
///
/// Cloning yields another handle to the same completion.
#[derive(Clone)]
pub struct CompletionFuture {
    inner: Arc<Inner>,
}

impl CompletionFuture {
    /// New non-cancellable future
    pub fn new() -> Self {
        Self::with_cancellable(false)
    }

    /// New future that accepts [`cancel`](Self::cancel)
    pub fn cancellable() -> Self {
        Self::with_cancellable(true)
    }

    fn with_cancellable(cancellable: bool) -> Self {
        let (released_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancellable,
                state: Mutex::new(State {
                    outcome: None,
                    result: None,
                    listeners: Vec::new(),
                    released: false,
                }),
                blocking_waiters: Condvar::new(),
                released_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Listeners run outside the lock, so a poisoned lock still holds a coherent state
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a terminal transition happened
    pub fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Whether the future completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self.lock().outcome, Some(Outcome::Success))
    }

    /// Whether the future completed with a failure
    pub fn is_failed(&self) -> bool {
        matches!(self.lock().outcome, Some(Outcome::Failure(_)))
    }

    /// Whether the future was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self.lock().outcome, Some(Outcome::Cancelled))
    }

    /// Whether [`cancel`](Self::cancel) is accepted
    pub fn is_cancellable(&self) -> bool {
        self.inner.cancellable
    }

    /// Failure cause, if the future failed
    pub fn cause(&self) -> Option<Arc<Error>> {
        match &self.lock().outcome {
            Some(Outcome::Failure(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Result payload, if any
    pub fn result(&self) -> Option<TransferResult> {
        self.lock().result.clone()
    }

    /// Attach a result before completion. Refused once done.
    pub fn set_result(&self, result: TransferResult) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() {
            tracing::debug!("ignoring result update on completed future");
            return false;
        }
        state.result = Some(result);
        true
    }

    /// Complete successfully. `None` keeps any result set earlier.
    pub fn set_success(&self, result: Option<TransferResult>) -> bool {
        self.complete(Outcome::Success, result)
    }

    /// Complete with a failure. `None` keeps any result set earlier.
    pub fn set_failure(&self, cause: Error, result: Option<TransferResult>) -> bool {
        self.complete(Outcome::Failure(Arc::new(cause)), result)
    }

    /// Complete with an already shared failure cause
    pub fn set_failure_shared(&self, cause: Arc<Error>, result: Option<TransferResult>) -> bool {
        self.complete(Outcome::Failure(cause), result)
    }

    /// Cancel the future. Refused for non-cancellable futures.
    pub fn cancel(&self, result: Option<TransferResult>) -> bool {
        if !self.inner.cancellable {
            tracing::debug!("cancel refused on non-cancellable future");
            return false;
        }
        self.complete(Outcome::Cancelled, result)
    }

    fn complete(&self, outcome: Outcome, result: Option<TransferResult>) -> bool {
        let listeners = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                tracing::debug!(?outcome, "ignoring second transition of completed future");
                return false;
            }
            state.outcome = Some(outcome);
            if result.is_some() {
                state.result = result;
            }
            std::mem::take(&mut state.listeners)
        };

        for listener in listeners {
            listener(self);
        }

        self.lock().released = true;
        self.inner.blocking_waiters.notify_all();
        self.inner.released_tx.send_replace(true);
        true
    }

    /// Register an observer run once on completion
    ///
    /// Runs immediately on the caller if the future is already done.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&CompletionFuture) + Send + 'static,
    {
        {
            let mut state = self.lock();
            if state.outcome.is_none() {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// Wait until done
    pub async fn wait(&self) {
        let mut rx = self.inner.released_tx.subscribe();
        // The sender lives in `inner`, which we hold, so the channel cannot close
        let _ = rx.wait_for(|released| *released).await;
    }

    /// Wait until done or `timeout` elapses; returns whether the future is done
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Block the current thread until done
    pub fn wait_blocking(&self) {
        let mut state = self.lock();
        while !state.released {
            state = self
                .inner
                .blocking_waiters
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block the current thread until done or `timeout` elapses
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .inner
            .blocking_waiters
            .wait_timeout_while(state, timeout, |state| !state.released)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.released
    }
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CompletionFuture")
            .field("cancellable", &self.inner.cancellable)
            .field("outcome", &state.outcome)
            .field("result", &state.result)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl std::fmt::Display for CompletionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let done = state.outcome.is_some();
        let success = matches!(state.outcome, Some(Outcome::Success));
        let cause = match &state.outcome {
            Some(Outcome::Failure(cause)) => cause.to_string(),
            _ => "no cause".to_string(),
        };
        let result = state
            .result
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "no result".to_string());
        write!(f, "Future: {} {} {} {}", done, success, cause, result)
    }
}
