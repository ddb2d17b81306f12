//! A single-assignment, future-like handle to the outcome of one request.
//!
//! Converting a long document takes anywhere from seconds to hours, so
//! `start_parallel` / `start_serial` return a [`ResultHandle`] immediately and
//! run the work in the background. The caller may poll it, await it (with or
//! without a timeout), block on it from synchronous code, or cancel it.
//!
//! The handle is a plain data object: state lives behind a mutex, async
//! waiters are woken through [`tokio::sync::Notify`] and blocking waiters
//! through a [`Condvar`]. Exactly one of `resolve` / `reject` / `cancel`
//! succeeds; every later call is ignored.

use crate::cancel::CancellationSignal;
use crate::error::ProcessingError;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Observable state of a [`ResultHandle`].
#[derive(Debug, Clone)]
pub enum HandleState<T> {
    Pending,
    Fulfilled(T),
    Rejected(Arc<ProcessingError>),
    Cancelled,
}

impl<T> HandleState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, HandleState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// The fulfilled value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            HandleState::Fulfilled(v) => Some(v),
            _ => None,
        }
    }
}

/// Returned by the timed waits when the handle is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimedOut;

impl fmt::Display for WaitTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timed out waiting for result")
    }
}

impl std::error::Error for WaitTimedOut {}

struct Inner<T> {
    operation: String,
    state: Mutex<HandleState<T>>,
    cond: Condvar,
    notify: Notify,
    signal: Option<CancellationSignal>,
}

/// Handle to the eventual result of one processing request.
///
/// Cheap to clone; every clone observes the same state. `Send + Sync`
/// whenever `T` is.
pub struct ResultHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            HandleState::Pending => "Pending",
            HandleState::Fulfilled(_) => "Fulfilled",
            HandleState::Rejected(_) => "Rejected",
            HandleState::Cancelled => "Cancelled",
        };
        f.debug_struct("ResultHandle")
            .field("operation", &self.inner.operation)
            .field("state", &state)
            .finish()
    }
}

impl<T> ResultHandle<T> {
    fn transition(&self, next: HandleState<T>) -> bool {
        let mut state = self.lock();
        if state.is_terminal() {
            debug!(operation = %self.inner.operation, "Ignoring repeated resolution");
            return false;
        }
        *state = next;
        drop(state);
        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
        true
    }

    fn lock(&self) -> MutexGuard<'_, HandleState<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> ResultHandle<T> {
    /// A pending handle not linked to any work.
    pub fn new(operation: impl Into<String>) -> Self {
        Self::build(operation.into(), None)
    }

    /// A pending handle whose `cancel()` also cancels `signal`.
    pub fn linked(operation: impl Into<String>, signal: CancellationSignal) -> Self {
        Self::build(operation.into(), Some(signal))
    }

    fn build(operation: String, signal: Option<CancellationSignal>) -> Self {
        Self {
            inner: Arc::new(Inner {
                operation,
                state: Mutex::new(HandleState::Pending),
                cond: Condvar::new(),
                notify: Notify::new(),
                signal,
            }),
        }
    }

    /// Human-readable name of the operation this handle tracks.
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// Fulfil the handle. Returns `false` if it was already terminal.
    pub fn resolve(&self, value: T) -> bool {
        self.transition(HandleState::Fulfilled(value))
    }

    /// Reject the handle. Returns `false` if it was already terminal.
    pub fn reject(&self, error: ProcessingError) -> bool {
        self.transition(HandleState::Rejected(Arc::new(error)))
    }

    /// Move the handle to `Cancelled` and request cancellation of the linked
    /// run, if any. Returns `false` if the handle was already terminal, in
    /// which case the linked signal is left untouched.
    pub fn cancel(&self) -> bool {
        let won = self.transition(HandleState::Cancelled);
        if won {
            if let Some(signal) = &self.inner.signal {
                signal.request_cancel();
            }
        }
        won
    }

    /// Current state, without suspending.
    pub fn poll(&self) -> HandleState<T> {
        self.lock().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().is_terminal()
    }

    /// Suspend until the handle is terminal.
    pub async fn wait(&self) -> HandleState<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a transition between the check and
            // the await is not missed.
            notified.as_mut().enable();
            {
                let state = self.lock();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            notified.await;
        }
    }

    /// Suspend until terminal or until `timeout` elapses. A timeout leaves
    /// the handle untouched.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<HandleState<T>, WaitTimedOut> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| WaitTimedOut)
    }

    /// Block the calling thread until terminal (or until `timeout`).
    ///
    /// For synchronous callers only; never call this from an async task.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Result<HandleState<T>, WaitTimedOut> {
        let guard = self.lock();
        match timeout {
            None => {
                let guard = self
                    .inner
                    .cond
                    .wait_while(guard, |s| s.is_pending())
                    .unwrap_or_else(|e| e.into_inner());
                Ok(guard.clone())
            }
            Some(t) => {
                let (guard, result) = self
                    .inner
                    .cond
                    .wait_timeout_while(guard, t, |s| s.is_pending())
                    .unwrap_or_else(|e| e.into_inner());
                if result.timed_out() && guard.is_pending() {
                    Err(WaitTimedOut)
                } else {
                    Ok(guard.clone())
                }
            }
        }
    }

}
