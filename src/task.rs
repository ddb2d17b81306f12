//! One page's bounded agent conversation.
//!
//! ```text
//! Queued → Dispatched → AwaitingAgent → (ToolExecuting → AwaitingAgent)* → Completed
//!                   ↘ Cancelled                       ↘ Failed | Cancelled
//! ```
//!
//! A [`PageTask`] always ends in a [`PageOutcome`]: agent errors, runaway
//! tool loops and cancellation are captured as page-local statuses and never
//! propagate to the scheduler that owns the task.
//!
//! ## Iteration bound
//!
//! Every agent invocation counts as one iteration. The agent is invoked at
//! most `max_iterations` times; if the last permitted turn still requests
//! tools, the page fails with [`PageError::ToolLoopExceeded`] without running
//! those tools.
//!
//! ## Cancellation
//!
//! The signal is checked at dispatch (no agent call at all if already
//! cancelled, status `Cancelled`), and again before every agent invocation
//! and every tool execution (status `Failed(OperationCancelled)`). A call in
//! flight is never aborted.

use crate::agent::{AgentCapability, Message};
use crate::cancel::CancellationSignal;
use crate::document::{PageFragment, PageOutcome, PageStatus};
use crate::error::PageError;
use crate::heading::{extract_heading_events, HeadingContext};
use crate::page::PageContent;
use crate::postprocess::clean_fragment;
use crate::progress::{PageReporter, SharedProgressSink, TaskPhase};
use crate::prompts::{heading_context_message, previous_page_context};
use crate::tools::ToolRegistry;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Characters of the previous page carried into the next page's transcript.
pub const PREVIOUS_PAGE_TAIL_CHARS: usize = 1500;

/// A page waiting for, or undergoing, conversion.
#[derive(Debug)]
pub struct PageTask {
    page: PageContent,
    transcript: Vec<Message>,
    iteration_count: usize,
    max_iterations: usize,
    context: HeadingContext,
}

impl PageTask {
    pub fn new(page: PageContent, system_prompt: &str, max_iterations: usize) -> Self {
        Self {
            page,
            transcript: vec![Message::system(system_prompt)],
            iteration_count: 0,
            max_iterations,
            context: HeadingContext::new(),
        }
    }

    /// Inject the headings still open before this page.
    ///
    /// Heading events of the resulting fragment are computed relative to it.
    pub fn with_heading_context(mut self, context: &HeadingContext) -> Self {
        if let Some(msg) = heading_context_message(context) {
            self.transcript.push(Message::system(msg));
        }
        self.context = context.clone();
        self
    }

    /// Inject the tail of the previous page's Markdown.
    pub fn with_previous_page(mut self, prior: &str) -> Self {
        if let Some(msg) = previous_page_context(prior, PREVIOUS_PAGE_TAIL_CHARS) {
            self.transcript.push(Message::system(msg));
        }
        self
    }

    pub fn page_index(&self) -> usize {
        self.page.page_index
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    /// Run to a terminal state, reporting to `sink` as unit `page_index` of
    /// `unit_total`. The `Queued` event is left to the caller.
    pub async fn execute(
        self,
        agent: &dyn AgentCapability,
        tools: &ToolRegistry,
        signal: &CancellationSignal,
        sink: SharedProgressSink,
        unit_total: usize,
    ) -> PageOutcome {
        let reporter = PageReporter::new(sink, self.page.page_index, unit_total);
        self.run(agent, tools, signal, &reporter).await
    }

    pub(crate) async fn run(
        mut self,
        agent: &dyn AgentCapability,
        tools: &ToolRegistry,
        signal: &CancellationSignal,
        reporter: &PageReporter,
    ) -> PageOutcome {
        let start = Instant::now();
        let page_index = self.page.page_index;
        let page_num = page_index + 1;

        reporter.emit(TaskPhase::Dispatched);
        if signal.is_cancelled() {
            debug!("Page {}: cancelled before dispatch", page_num);
            reporter.emit(TaskPhase::Cancelled);
            return outcome(page_index, PageStatus::Cancelled, start);
        }

        let images = self.page.screenshot.iter().cloned().collect();
        self.transcript.push(Message::user_with_images(
            self.page.to_llm_input(false),
            images,
        ));
        let descriptors = tools.descriptors();

        loop {
            if signal.is_cancelled() {
                return self.cancelled_mid_loop(reporter, start);
            }

            reporter.emit(TaskPhase::AwaitingAgent);
            self.iteration_count += 1;
            let turn = match agent.invoke(&self.transcript, &descriptors).await {
                Ok(turn) => turn,
                Err(e) => {
                    return self.fail(
                        PageError::AgentInvocationFailed {
                            page_index,
                            detail: e.to_string(),
                        },
                        reporter,
                        start,
                    );
                }
            };

            if !turn.has_tool_calls() {
                return self.complete(&turn.content, reporter, start);
            }

            if self.iteration_count >= self.max_iterations {
                let max_iterations = self.max_iterations;
                return self.fail(
                    PageError::ToolLoopExceeded {
                        page_index,
                        max_iterations,
                    },
                    reporter,
                    start,
                );
            }

            self.transcript.push(Message::assistant(&turn));
            reporter.emit(TaskPhase::ToolExecuting);
            for call in &turn.tool_calls {
                if signal.is_cancelled() {
                    return self.cancelled_mid_loop(reporter, start);
                }
                let result = match tools.execute(&self.page, call).await {
                    Ok(output) => Message::tool_result(&call.id, output),
                    Err(e) => {
                        debug!("Page {}: tool '{}' failed: {}", page_num, call.name, e);
                        Message::tool_error(&call.id, e.to_string())
                    }
                };
                self.transcript.push(result);
            }
        }
    }

    fn complete(self, content: &str, reporter: &PageReporter, start: Instant) -> PageOutcome {
        let page_index = self.page.page_index;
        let text = {
            let ids: Vec<&str> = self.page.images.iter().map(|i| i.id.as_str()).collect();
            clean_fragment(content, &ids)
        };
        if text.is_empty() {
            return self.fail(
                PageError::AgentInvocationFailed {
                    page_index,
                    detail: "agent returned an empty page without tool calls".into(),
                },
                reporter,
                start,
            );
        }

        let heading_events = extract_heading_events(&text, &self.context);
        info!(
            "Page {}: completed after {} iteration(s)",
            page_index + 1,
            self.iteration_count
        );
        reporter.emit(TaskPhase::Completed);
        outcome(
            page_index,
            PageStatus::Completed(PageFragment {
                page_index,
                text,
                heading_events,
                iterations: self.iteration_count,
            }),
            start,
        )
    }

    fn fail(self, error: PageError, reporter: &PageReporter, start: Instant) -> PageOutcome {
        warn!("{}", error);
        reporter.emit(TaskPhase::Failed);
        outcome(self.page.page_index, PageStatus::Failed(error), start)
    }

    fn cancelled_mid_loop(self, reporter: &PageReporter, start: Instant) -> PageOutcome {
        let page_index = self.page.page_index;
        debug!(
            "Page {}: cancelled after {} iteration(s)",
            page_index + 1,
            self.iteration_count
        );
        reporter.emit(TaskPhase::Cancelled);
        outcome(
            page_index,
            PageStatus::Failed(PageError::OperationCancelled { page_index }),
            start,
        )
    }
}

fn outcome(page_index: usize, status: PageStatus, start: Instant) -> PageOutcome {
    PageOutcome {
        page_index,
        status,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AssistantTurn, Role, ToolDescriptor};
    use crate::error::{AgentError, ToolError};
    use crate::heading::HeadingEvent;
    use crate::progress::{NoopProgressSink, ProgressEvent};
    use crate::tools::PageTool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted turns and records every transcript it sees.
    struct Scripted {
        turns: Mutex<VecDeque<Result<AssistantTurn, AgentError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(turns: Vec<Result<AssistantTurn, AgentError>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AgentCapability for Scripted {
        async fn invoke(
            &self,
            transcript: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, AgentError> {
            self.seen.lock().unwrap().push(transcript.to_vec());
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(AssistantTurn::default().with_tool_call("x", "echo", json!({}))))
        }
    }

    struct Echo;

    #[async_trait]
    impl PageTool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".into(),
                description: "echo".into(),
                parameters: json!({}),
            }
        }

        async fn call(&self, page: &PageContent, args: &Value) -> Result<String, ToolError> {
            if args.get("fail").is_some() {
                return Err(ToolError::Failed {
                    tool: "echo".into(),
                    detail: "boom".into(),
                });
            }
            Ok(format!("page {}", page.page_index + 1))
        }
    }

    fn tools() -> ToolRegistry {
        ToolRegistry::new().with_tool(Arc::new(Echo))
    }

    fn task(max: usize) -> PageTask {
        PageTask::new(PageContent::from_text(0, "Hello"), "convert", max)
    }

    fn recording_sink() -> (SharedProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let clone = Arc::clone(&events);
        let sink: SharedProgressSink = Arc::new(move |e: ProgressEvent| clone.lock().unwrap().push(e));
        (sink, events)
    }

    fn noop() -> SharedProgressSink {
        Arc::new(NoopProgressSink)
    }

    #[tokio::test]
    async fn content_only_turn_completes() {
        let agent = Scripted::new(vec![Ok(AssistantTurn::content("# Intro\n\nBody"))]);
        let (sink, events) = recording_sink();
        let out = task(4)
            .execute(&agent, &tools(), &CancellationSignal::new(), sink, 1)
            .await;

        let fragment = out.fragment().expect("completed");
        assert_eq!(fragment.text, "# Intro\n\nBody\n");
        assert_eq!(fragment.iterations, 1);
        assert_eq!(
            fragment.heading_events,
            vec![HeadingEvent::Open {
                level: 1,
                title: "Intro".into()
            }]
        );
        let phases: Vec<_> = events.lock().unwrap().iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![TaskPhase::Dispatched, TaskPhase::AwaitingAgent, TaskPhase::Completed]
        );
    }

    #[tokio::test]
    async fn tool_results_are_fed_back() {
        let agent = Scripted::new(vec![
            Ok(AssistantTurn::default()
                .with_tool_call("c1", "echo", json!({}))
                .with_tool_call("c2", "missing", json!({}))
                .with_tool_call("c3", "echo", json!({"fail": true}))),
            Ok(AssistantTurn::content("Done")),
        ]);
        let out = task(4)
            .execute(&agent, &tools(), &CancellationSignal::new(), noop(), 1)
            .await;
        assert!(out.is_completed());
        assert_eq!(out.fragment().unwrap().iterations, 2);

        let seen = agent.seen.lock().unwrap();
        let second = &seen[1];
        let tool_msgs: Vec<_> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_msgs.len(), 3);
        assert_eq!(tool_msgs[0].content, "page 1");
        assert!(!tool_msgs[0].is_error);
        assert!(tool_msgs[1].is_error && tool_msgs[1].content.contains("unknown tool"));
        assert!(tool_msgs[2].is_error && tool_msgs[2].content.contains("boom"));
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let agent = Scripted::new(vec![]);
        let out = task(3)
            .execute(&agent, &tools(), &CancellationSignal::new(), noop(), 1)
            .await;
        assert_eq!(
            out.error(),
            Some(&PageError::ToolLoopExceeded {
                page_index: 0,
                max_iterations: 3
            })
        );
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test]
    async fn agent_error_and_empty_turn_fail_the_page() {
        let agent = Scripted::new(vec![Err(AgentError::Unavailable("503".into()))]);
        let out = task(2)
            .execute(&agent, &tools(), &CancellationSignal::new(), noop(), 1)
            .await;
        assert_eq!(out.error().map(|e| e.kind()), Some("AgentInvocationFailed"));

        let agent = Scripted::new(vec![Ok(AssistantTurn::content("  \n"))]);
        let out = task(2)
            .execute(&agent, &tools(), &CancellationSignal::new(), noop(), 1)
            .await;
        assert_eq!(out.error().map(|e| e.kind()), Some("AgentInvocationFailed"));
    }

    #[tokio::test]
    async fn cancelled_at_dispatch_never_invokes_agent() {
        let agent = Scripted::new(vec![Ok(AssistantTurn::content("x"))]);
        let signal = CancellationSignal::new();
        signal.request_cancel();
        let (sink, events) = recording_sink();
        let out = task(2).execute(&agent, &tools(), &signal, sink, 1).await;
        assert_eq!(out.status, PageStatus::Cancelled);
        assert_eq!(agent.calls(), 0);
        let phases: Vec<_> = events.lock().unwrap().iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![TaskPhase::Dispatched, TaskPhase::Cancelled]);
    }

    struct CancelOnCall(CancellationSignal);

    #[async_trait]
    impl AgentCapability for CancelOnCall {
        async fn invoke(
            &self,
            _transcript: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, AgentError> {
            self.0.request_cancel();
            Ok(AssistantTurn::default().with_tool_call("c1", "echo", json!({})))
        }
    }

    #[tokio::test]
    async fn cancellation_mid_loop_stops_before_tools() {
        let signal = CancellationSignal::new();
        let agent = CancelOnCall(signal.clone());
        let out = task(5).execute(&agent, &tools(), &signal, noop(), 1).await;
        assert_eq!(
            out.error(),
            Some(&PageError::OperationCancelled { page_index: 0 })
        );
        assert!(out.is_cancelled());
    }

    #[tokio::test]
    async fn context_precedes_page_input() {
        let mut ctx = HeadingContext::new();
        ctx.apply(&[HeadingEvent::Open {
            level: 1,
            title: "Intro".into(),
        }]);
        let agent = Scripted::new(vec![Ok(AssistantTurn::content("## Scope"))]);
        let out = task(2)
            .with_heading_context(&ctx)
            .with_previous_page("previous text")
            .execute(&agent, &tools(), &CancellationSignal::new(), noop(), 1)
            .await;

        let seen = agent.seen.lock().unwrap();
        let roles: Vec<_> = seen[0].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::System, Role::System, Role::User]);
        assert!(seen[0][1].content.contains("# Intro"));
        assert!(seen[0][3].content.starts_with("[Page 1]"));
        // A level-2 heading under an open level-1 heading closes nothing.
        assert_eq!(
            out.fragment().unwrap().heading_events,
            vec![HeadingEvent::Open {
                level: 2,
                title: "Scope".into()
            }]
        );
    }
}
