//! Caller surface: start a run, get a handle.
//!
//! [`Processor`] binds an agent capability and a tool catalog; each `start_*`
//! call validates its inputs synchronously, spawns the run on the current
//! Tokio runtime, and returns a [`ResultHandle`] at once.
//!
//! ## Outcomes
//!
//! A run that reaches its end always *fulfils* the handle with an
//! [`AggregatedDocument`], whose [`RunStatus`](crate::document::RunStatus)
//! tells completed, partially failed, aborted and cancelled runs apart, so
//! fragments produced before a failure or a cancellation are never lost.
//! The handle is *rejected* only on internal errors, and is *cancelled*
//! only through [`ResultHandle::cancel`], which also cancels the run.
//!
//! ## Signals
//!
//! Every run works on a child of the caller's signal (or of a fresh one).
//! `config.deadline` is applied to that child, so a signal shared between
//! several runs is never mutated by one of them, while cancelling it still
//! reaches them all.

use crate::agent::AgentCapability;
use crate::assemble::{assemble, AssemblyOptions};
use crate::cancel::CancellationSignal;
use crate::config::ProcessingConfig;
use crate::document::{AggregatedDocument, RunMode};
use crate::error::ProcessingError;
use crate::handle::{HandleState, ResultHandle};
use crate::page::PageContent;
use crate::progress::{NoopProgressSink, SharedProgressSink};
use crate::scheduler::ParallelScheduler;
use crate::serial::SerialPipeline;
use crate::tools::{PageTool, ToolRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Handles returned by [`Processor::start_dual`].
#[derive(Debug, Clone)]
pub struct DualHandles {
    pub parallel: ResultHandle<AggregatedDocument>,
    pub serial: ResultHandle<AggregatedDocument>,
}

/// Entry point for page processing.
#[derive(Clone)]
pub struct Processor {
    agent: Arc<dyn AgentCapability>,
    tools: ToolRegistry,
}

impl Processor {
    pub fn new(agent: Arc<dyn AgentCapability>) -> Self {
        Self {
            agent,
            tools: ToolRegistry::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn PageTool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start a parallel run.
    pub fn start_parallel(
        &self,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<ResultHandle<AggregatedDocument>, ProcessingError> {
        self.start(RunMode::Parallel, pages, config, signal, sink)
    }

    /// Start a serial run.
    pub fn start_serial(
        &self,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<ResultHandle<AggregatedDocument>, ProcessingError> {
        self.start(RunMode::Serial, pages, config, signal, sink)
    }

    /// Start a parallel and a serial run over the same pages.
    ///
    /// The runs are independent: each has its own child signal and handle,
    /// and neither result is reconciled with the other.
    pub fn start_dual(
        &self,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<DualHandles, ProcessingError> {
        check_inputs(&pages, &config)?;
        let signal = signal.unwrap_or_default();
        let parallel = self.start(
            RunMode::Parallel,
            pages.clone(),
            config.clone(),
            Some(signal.clone()),
            sink.clone(),
        )?;
        let serial = self.start(RunMode::Serial, pages, config, Some(signal), sink)?;
        Ok(DualHandles { parallel, serial })
    }

    /// Run in parallel and wait for the document.
    pub async fn run_parallel(
        &self,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<AggregatedDocument, ProcessingError> {
        let handle = self.start_parallel(pages, config, signal, sink)?;
        settle(handle).await
    }

    /// Run serially and wait for the document.
    pub async fn run_serial(
        &self,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<AggregatedDocument, ProcessingError> {
        let handle = self.start_serial(pages, config, signal, sink)?;
        settle(handle).await
    }

    fn start(
        &self,
        mode: RunMode,
        pages: Vec<PageContent>,
        config: ProcessingConfig,
        signal: Option<CancellationSignal>,
        sink: Option<SharedProgressSink>,
    ) -> Result<ResultHandle<AggregatedDocument>, ProcessingError> {
        check_inputs(&pages, &config)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ProcessingError::InvalidConfiguration(format!(
                "starting a run requires a Tokio runtime: {e}"
            ))
        })?;

        let parent = signal.unwrap_or_default();
        let run_signal = match config.deadline {
            Some(d) => parent.child_with_timeout(d),
            None => parent.child(),
        };
        let sink = sink.unwrap_or_else(|| Arc::new(NoopProgressSink));
        let operation = match mode {
            RunMode::Parallel => "parallel run",
            RunMode::Serial => "serial run",
        };
        let handle = ResultHandle::linked(operation, run_signal.clone());

        let agent = Arc::clone(&self.agent);
        let tools = self.tools.clone();
        let worker = runtime.spawn(execute(mode, agent, tools, pages, config, run_signal, sink));

        let settle_handle = handle.clone();
        runtime.spawn(async move {
            match worker.await {
                Ok(doc) => {
                    if !settle_handle.resolve(doc) {
                        debug!("{} finished after its handle settled", operation);
                    }
                }
                Err(e) => {
                    error!("{} worker failed: {}", operation, e);
                    settle_handle.reject(ProcessingError::Internal(format!(
                        "{operation} worker failed: {e}"
                    )));
                }
            }
        });

        Ok(handle)
    }
}

/// Run one strategy to completion and assemble the result.
async fn execute(
    mode: RunMode,
    agent: Arc<dyn AgentCapability>,
    tools: ToolRegistry,
    pages: Vec<PageContent>,
    config: ProcessingConfig,
    signal: CancellationSignal,
    sink: SharedProgressSink,
) -> AggregatedDocument {
    let start = Instant::now();
    let total = pages.len();
    let options = AssemblyOptions {
        separator: config.page_separator.clone(),
        include_toc: config.include_toc,
    };

    let (outcomes, abort) = match mode {
        RunMode::Parallel => {
            let outcomes = ParallelScheduler::new(agent, tools, config)
                .run(pages, &signal, sink)
                .await;
            (outcomes, None)
        }
        RunMode::Serial => {
            let run = SerialPipeline::new(agent, tools, config)
                .run(pages, &signal, sink)
                .await;
            (run.outcomes, run.abort)
        }
    };

    let doc = assemble(mode, outcomes, total, &options, abort, start.elapsed());
    info!(
        "{:?} run finished: {}/{} pages completed in {}ms ({:?})",
        mode, doc.stats.completed_pages, total, doc.stats.duration_ms, doc.status
    );
    doc
}

async fn settle(
    handle: ResultHandle<AggregatedDocument>,
) -> Result<AggregatedDocument, ProcessingError> {
    match handle.wait().await {
        HandleState::Fulfilled(doc) => Ok(doc),
        HandleState::Rejected(e) => Err(ProcessingError::Internal(e.to_string())),
        HandleState::Cancelled | HandleState::Pending => Err(ProcessingError::Internal(format!(
            "{} was cancelled before producing a document",
            handle.operation()
        ))),
    }
}

/// Reject bad configuration and malformed page sets before anything runs.
fn check_inputs(pages: &[PageContent], config: &ProcessingConfig) -> Result<(), ProcessingError> {
    config.validate()?;
    if pages.is_empty() {
        return Err(ProcessingError::EmptySelection { total: 0 });
    }
    let mut seen = HashSet::with_capacity(pages.len());
    for page in pages {
        if page.page_index >= pages.len() || !seen.insert(page.page_index) {
            return Err(ProcessingError::InvalidConfiguration(format!(
                "page indices must be unique and within 0..{} (got {})",
                pages.len(),
                page.page_index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AssistantTurn, Message, ToolDescriptor};
    use crate::document::RunStatus;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl AgentCapability for Echo {
        async fn invoke(
            &self,
            transcript: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, AgentError> {
            let last = transcript.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(AssistantTurn::content(last))
        }
    }

    struct Slow;

    #[async_trait]
    impl AgentCapability for Slow {
        async fn invoke(
            &self,
            _transcript: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, AgentError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(AssistantTurn::content("late"))
        }
    }

    fn pages(n: usize) -> Vec<PageContent> {
        (0..n).map(|i| PageContent::from_text(i, "body")).collect()
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected_synchronously() {
        let p = Processor::new(Arc::new(Echo));
        let bad = ProcessingConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            p.start_parallel(pages(2), bad, None, None),
            Err(ProcessingError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            p.start_serial(vec![], ProcessingConfig::default(), None, None),
            Err(ProcessingError::EmptySelection { .. })
        ));
        let dup = vec![PageContent::from_text(0, "a"), PageContent::from_text(0, "b")];
        assert!(p
            .start_serial(dup, ProcessingConfig::default(), None, None)
            .is_err());
    }

    #[test]
    fn starting_without_runtime_is_an_error() {
        let p = Processor::new(Arc::new(Echo));
        let err = p
            .start_parallel(pages(1), ProcessingConfig::default(), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[tokio::test]
    async fn run_parallel_produces_document() {
        let doc = Processor::new(Arc::new(Echo))
            .run_parallel(pages(3), ProcessingConfig::default(), None, None)
            .await
            .unwrap();
        assert_eq!(doc.status, RunStatus::Completed);
        assert!(doc.markdown.starts_with("[Page 1]"));
        assert_eq!(doc.pages.len(), 3);
    }

    #[tokio::test]
    async fn handle_cancel_cancels_run_but_not_caller_signal() {
        let caller = CancellationSignal::new();
        let p = Processor::new(Arc::new(Slow));
        let handle = p
            .start_serial(pages(3), ProcessingConfig::default(), Some(caller.clone()), None)
            .unwrap();
        assert!(handle.cancel());
        assert!(matches!(handle.wait().await, HandleState::Cancelled));
        assert!(!caller.is_cancelled());
    }

    #[tokio::test]
    async fn dual_runs_are_independent() {
        let p = Processor::new(Arc::new(Echo));
        let handles = p
            .start_dual(pages(2), ProcessingConfig::default(), None, None)
            .unwrap();
        let parallel = handles.parallel.wait().await;
        let serial = handles.serial.wait().await;
        assert_eq!(parallel.value().map(|d| d.mode), Some(RunMode::Parallel));
        assert_eq!(serial.value().map(|d| d.mode), Some(RunMode::Serial));
        assert_eq!(
            parallel.value().map(|d| d.markdown.clone()),
            serial.value().map(|d| d.markdown.clone())
        );
    }

    #[tokio::test]
    async fn deadline_cancels_remaining_pages() {
        let config = ProcessingConfig {
            deadline: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let doc = Processor::new(Arc::new(Slow))
            .run_serial(pages(3), config, None, None)
            .await
            .unwrap();
        assert_eq!(doc.status, RunStatus::Cancelled);
        // The in-flight page finishes; later pages never start.
        assert!(doc.pages[0].is_completed());
        assert!(doc.pages[1..].iter().all(|p| p.is_cancelled()));
    }
}
