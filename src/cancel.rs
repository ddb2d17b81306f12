//! Cooperative cancellation shared by every task of one processing request.
//!
//! A [`CancellationSignal`] wraps a [`tokio_util::sync::CancellationToken`]
//! and adds an optional absolute deadline. The deadline is evaluated lazily:
//! `is_cancelled()` compares against the clock and latches the token the
//! first time the deadline is observed as elapsed, so no timer task is needed
//! and the signal works outside a Tokio runtime.
//!
//! # Limitation
//!
//! Cancellation is cooperative. Schedulers and page tasks check the signal
//! before starting new work (dispatch, agent invocation, tool execution); an
//! agent call already in flight is never interrupted, because third-party
//! network I/O cannot be aborted safely. The task observes the signal at its
//! next suspension point.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a signal moved to the cancelled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `request_cancel()` was called (on this signal or an ancestor).
    Requested,
    /// The deadline elapsed before anyone requested cancellation.
    DeadlineElapsed,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    reason: OnceLock<CancelReason>,
    // Consulted for the reason when the token was cancelled from above.
    parent: Option<CancellationSignal>,
}

/// A shared, idempotent, propagatable cancel flag with an optional deadline.
///
/// Cloning is cheap and every clone observes the same state. Once cancelled
/// a signal stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// A signal with no deadline.
    pub fn new() -> Self {
        Self::from_parts(CancellationToken::new(), None, None)
    }

    /// A signal that cancels itself `timeout` after creation.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_parts(CancellationToken::new(), Some(Instant::now() + timeout), None)
    }

    fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<CancellationSignal>,
    ) -> Self {
        debug!(?deadline, "CancellationSignal created");
        Self {
            inner: Arc::new(Inner {
                token,
                deadline,
                reason: OnceLock::new(),
                parent,
            }),
        }
    }

    /// Derive a signal that is cancelled whenever `self` is, but whose own
    /// cancellation does not propagate back to `self`.
    pub fn child(&self) -> Self {
        Self::from_parts(
            self.inner.token.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// Like [`child`](Self::child), with an additional deadline. The earlier
    /// of the parent's deadline and `now + timeout` wins.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        Self::from_parts(
            self.inner.token.child_token(),
            Some(deadline),
            Some(self.clone()),
        )
    }

    /// Request cancellation. Idempotent; safe from any thread.
    pub fn request_cancel(&self) {
        if self.inner.reason.set(CancelReason::Requested).is_ok() {
            info!("Cancellation requested");
        }
        self.inner.token.cancel();
    }

    /// Non-blocking check. Latches the cancelled state if the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.token.is_cancelled() {
            return true;
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                if self.inner.reason.set(CancelReason::DeadlineElapsed).is_ok() {
                    info!("Cancellation deadline elapsed");
                }
                self.inner.token.cancel();
                return true;
            }
        }
        false
    }

    /// Why the signal was cancelled, or `None` while it is still active.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        if let Some(reason) = self.inner.reason.get() {
            return Some(*reason);
        }
        // Cancelled through an ancestor: report the ancestor's reason.
        Some(
            self.inner
                .parent
                .as_ref()
                .and_then(CancellationSignal::reason)
                .unwrap_or(CancelReason::Requested),
        )
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolve once the signal is cancelled, by request or by deadline.
    pub async fn cancelled(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        // Latch the state and record the reason.
                        self.is_cancelled();
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }
}
