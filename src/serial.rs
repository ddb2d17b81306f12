//! Serial strategy: pages in order, with the heading outline threaded forward.
//!
//! Each page starts with the headings still open after the previous page, so
//! the agent can continue a section that spans a page break instead of
//! opening a new one. The [`HeadingContext`] is owned by the pipeline and
//! only mutated between pages, after a page completes.

use crate::agent::AgentCapability;
use crate::cancel::CancellationSignal;
use crate::config::{FailurePolicy, ProcessingConfig};
use crate::document::{PageOutcome, PageStatus};
use crate::error::{PageError, SerialAbortedOnFailure};
use crate::heading::HeadingContext;
use crate::page::PageContent;
use crate::progress::{PageReporter, SharedProgressSink, TaskPhase};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::task::PageTask;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a serial run before assembly.
#[derive(Debug, Clone)]
pub struct SerialRun {
    /// One outcome per input page, in page order.
    pub outcomes: Vec<PageOutcome>,
    /// Set when `FailFast` stopped the run.
    pub abort: Option<SerialAbortedOnFailure>,
    /// Headings still open after the last completed page.
    pub context: HeadingContext,
}

/// Runs pages one at a time in page order.
pub struct SerialPipeline {
    agent: Arc<dyn AgentCapability>,
    tools: ToolRegistry,
    config: ProcessingConfig,
}

impl SerialPipeline {
    pub fn new(agent: Arc<dyn AgentCapability>, tools: ToolRegistry, config: ProcessingConfig) -> Self {
        Self {
            agent,
            tools,
            config,
        }
    }

    pub async fn run(
        &self,
        mut pages: Vec<PageContent>,
        signal: &CancellationSignal,
        sink: SharedProgressSink,
    ) -> SerialRun {
        pages.sort_by_key(|p| p.page_index);
        let total = pages.len();
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        info!(
            "Serial run: {} pages, policy {:?}",
            total, self.config.failure_policy
        );

        let reporters: Vec<PageReporter> = pages
            .iter()
            .map(|p| {
                let r = PageReporter::new(Arc::clone(&sink), p.page_index, total);
                r.emit(TaskPhase::Queued);
                r
            })
            .collect();

        let mut context = HeadingContext::new();
        let mut previous: Option<String> = None;
        let mut abort: Option<SerialAbortedOnFailure> = None;
        let mut outcomes = Vec::with_capacity(total);

        for (page, reporter) in pages.into_iter().zip(reporters) {
            let page_index = page.page_index;

            if let Some(ref a) = abort {
                reporter.emit(TaskPhase::Cancelled);
                outcomes.push(PageOutcome {
                    page_index,
                    status: PageStatus::NotAttempted {
                        reason: format!("serial run aborted at page {}", a.failed_page_index + 1),
                    },
                    duration_ms: 0,
                });
                continue;
            }

            if signal.is_cancelled() {
                reporter.emit(TaskPhase::Cancelled);
                outcomes.push(PageOutcome {
                    page_index,
                    status: PageStatus::Cancelled,
                    duration_ms: 0,
                });
                continue;
            }

            let mut task = PageTask::new(page, system_prompt, self.config.max_iterations_per_page)
                .with_heading_context(&context);
            if self.config.carry_previous_page {
                if let Some(prior) = previous.as_deref() {
                    task = task.with_previous_page(prior);
                }
            }

            let outcome = task
                .run(&*self.agent, &self.tools, signal, &reporter)
                .await;

            match &outcome.status {
                PageStatus::Completed(fragment) => {
                    context.apply(&fragment.heading_events);
                    debug!("Page {}: open headings now [{}]", page_index + 1, context);
                    previous = Some(fragment.text.clone());
                }
                PageStatus::Failed(PageError::OperationCancelled { .. }) => {}
                PageStatus::Failed(error) => match self.config.failure_policy {
                    FailurePolicy::FailFast => {
                        warn!("Page {}: failure aborts the serial run", page_index + 1);
                        abort = Some(SerialAbortedOnFailure {
                            failed_page_index: page_index,
                            cause: error.clone(),
                        });
                    }
                    FailurePolicy::ContinueOnError => {
                        debug!("Page {}: failed, continuing with unchanged context", page_index + 1);
                    }
                },
                PageStatus::Cancelled | PageStatus::NotAttempted { .. } => {}
            }
            outcomes.push(outcome);
        }

        SerialRun {
            outcomes,
            abort,
            context,
        }
    }
}
