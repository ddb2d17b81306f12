//! Per-page progress events and the sinks that receive them.
//!
//! Pass an [`Arc<dyn ProgressSink>`] to `start_parallel` / `start_serial` to
//! observe every page as it moves through its state machine.
//!
//! # Why a sink trait instead of a fixed channel?
//!
//! Callers forward events to very different places: a terminal progress bar,
//! a broadcast channel feeding a WebSocket, a database row. The trait keeps
//! the library unaware of how the host application communicates; the
//! [`progress_channel`] helper covers the common "give me a stream" case.
//!
//! # Delivery contract
//!
//! * `report` never blocks the producer and never panics. Sinks that can fail
//!   (closed channel, full buffer) drop the event.
//! * For one `unit_index`, events arrive in state-machine order and nothing
//!   follows a terminal phase. Events of different units interleave freely in
//!   parallel mode.
//! * Losing an event never affects document correctness.

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Phase of a page task's state machine.
///
/// `AwaitingAgent` and `ToolExecuting` alternate while the agent is using
/// tools; every other phase occurs at most once per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    Queued,
    Dispatched,
    AwaitingAgent,
    ToolExecuting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskPhase {
    /// Completed, Failed and Cancelled end a unit's event sequence.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }

    /// Whether `next` may follow `self` for the same unit.
    pub fn can_advance_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Cancelled) => true,
            (Queued, Dispatched) => true,
            (Dispatched, AwaitingAgent) | (Dispatched, Failed) => true,
            (AwaitingAgent, ToolExecuting) | (AwaitingAgent, Completed) | (AwaitingAgent, Failed) => {
                true
            }
            (ToolExecuting, AwaitingAgent) | (ToolExecuting, Failed) => true,
            _ => false,
        }
    }
}

/// One observation of a page's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-based page index.
    pub unit_index: usize,
    /// Number of pages in the request.
    pub unit_total: usize,
    pub phase: TaskPhase,
    pub timestamp: SystemTime,
}

/// Receives progress events. Implementations must be cheap and non-blocking.
///
/// In parallel mode `report` is called concurrently from several pages, so
/// shared mutable state needs its own synchronisation (`Mutex`, atomics).
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Any `Fn(ProgressEvent)` closure is a sink.
impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// A no-op sink, used when the caller passes none.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// Convenience alias for the type taken by the `start_*` functions.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

/// Sink half of [`progress_channel`]. Unbounded, so `report` never waits;
/// events are dropped once the receiver is gone.
#[derive(Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Receiver half of [`progress_channel`].
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Next event; `None` once every sink clone has been dropped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Non-blocking read.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Consume the receiver as a `Stream` of events.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        Box::pin(UnboundedReceiverStream::new(self.rx))
    }
}

/// Create a connected sink/receiver pair.
pub fn progress_channel() -> (ChannelProgressSink, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelProgressSink { tx }, ProgressReceiver { rx })
}

/// Emits events for one page, enforcing the per-unit ordering contract.
///
/// Owned by whoever owns the page task, so the last-phase bookkeeping needs
/// no sharing; the mutex only lets `emit` take `&self`.
pub(crate) struct PageReporter {
    sink: SharedProgressSink,
    unit_index: usize,
    unit_total: usize,
    last: Mutex<Option<TaskPhase>>,
}

impl PageReporter {
    pub(crate) fn new(sink: SharedProgressSink, unit_index: usize, unit_total: usize) -> Self {
        Self {
            sink,
            unit_index,
            unit_total,
            last: Mutex::new(None),
        }
    }

    /// Report `phase` unless it would violate the unit's ordering.
    pub(crate) fn emit(&self, phase: TaskPhase) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let allowed = match *last {
            None => true,
            Some(prev) => prev.can_advance_to(phase),
        };
        if !allowed {
            tracing::debug!(
                page = self.unit_index + 1,
                ?phase,
                previous = ?*last,
                "Dropping out-of-order progress event"
            );
            return;
        }
        *last = Some(phase);
        drop(last);
        self.sink.report(ProgressEvent {
            unit_index: self.unit_index,
            unit_total: self.unit_total,
            phase,
            timestamp: SystemTime::now(),
        });
    }
}
