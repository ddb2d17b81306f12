//! Parallel strategy: independent pages on a bounded pool.
//!
//! ## Why `buffer_unordered`?
//!
//! `futures::stream::iter(..).buffer_unordered(limit)` polls at most `limit`
//! page futures at once and only pulls the next page when one of them is
//! terminal. That gives the bounded pool without semaphores or spawned
//! workers, and the pull happens lazily, so the signal is checked at the
//! moment a slot frees rather than when the run starts.
//!
//! Pages complete in whatever order the agent answers; the assembler
//! restores page order afterwards.

use crate::agent::AgentCapability;
use crate::cancel::CancellationSignal;
use crate::config::ProcessingConfig;
use crate::document::{PageOutcome, PageStatus};
use crate::page::PageContent;
use crate::progress::{PageReporter, SharedProgressSink, TaskPhase};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::task::PageTask;
use crate::tools::ToolRegistry;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs every page independently, at most `concurrency_limit` at a time.
pub struct ParallelScheduler {
    agent: Arc<dyn AgentCapability>,
    tools: ToolRegistry,
    config: ProcessingConfig,
}

impl ParallelScheduler {
    pub fn new(agent: Arc<dyn AgentCapability>, tools: ToolRegistry, config: ProcessingConfig) -> Self {
        Self {
            agent,
            tools,
            config,
        }
    }

    /// Run all pages to a terminal state. Outcomes are in completion order.
    pub async fn run(
        &self,
        pages: Vec<PageContent>,
        signal: &CancellationSignal,
        sink: SharedProgressSink,
    ) -> Vec<PageOutcome> {
        let total = pages.len();
        let limit = self.config.concurrency_limit.max(1);
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let max_iterations = self.config.max_iterations_per_page;
        let fail_fast = self.config.parallel_fail_fast;
        // 1-based number of the first failed page; 0 while none failed.
        let first_failure = AtomicUsize::new(0);

        info!("Parallel run: {} pages, concurrency {}", total, limit);

        let queued: Vec<(PageContent, PageReporter)> = pages
            .into_iter()
            .map(|page| {
                let reporter = PageReporter::new(Arc::clone(&sink), page.page_index, total);
                reporter.emit(TaskPhase::Queued);
                (page, reporter)
            })
            .collect();

        let agent = &*self.agent;
        let tools = &self.tools;
        let first_failure = &first_failure;

        stream::iter(queued.into_iter().map(|(page, reporter)| async move {
            let page_index = page.page_index;

            let failed_at = first_failure.load(Ordering::Acquire);
            if fail_fast && failed_at > 0 {
                debug!("Page {}: not dispatched, page {} failed", page_index + 1, failed_at);
                reporter.emit(TaskPhase::Cancelled);
                return PageOutcome {
                    page_index,
                    status: PageStatus::NotAttempted {
                        reason: format!("parallel run stopped after page {} failed", failed_at),
                    },
                    duration_ms: 0,
                };
            }

            let outcome = PageTask::new(page, system_prompt, max_iterations)
                .run(agent, tools, signal, &reporter)
                .await;

            if fail_fast && matches!(outcome.status, PageStatus::Failed(_)) && !outcome.is_cancelled()
            {
                let _ = first_failure.compare_exchange(
                    0,
                    page_index + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            outcome
        }))
        .buffer_unordered(limit)
        .collect::<Vec<_>>()
        .await
    }
}
