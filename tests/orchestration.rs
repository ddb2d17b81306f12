//! Orchestration tests with scripted agents.
//!
//! Every agent here is an in-process stub, so these tests need neither
//! pdfium nor an API key. The last test converts a real PDF and is gated
//! behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test orchestration -- --nocapture

use agentic_pdf2md::{
    AgentCapability, AgentError, AssistantTurn, CancellationSignal, FailurePolicy, HandleState,
    Message, PageContent, PageError, PageStatus, PageTool, ProcessingConfig, ProcessingError,
    Processor, ProgressEvent, ResultHandle, Role, RunStatus, SharedProgressSink, TaskPhase,
    ToolDescriptor, ToolError,
};
use agentic_pdf2md::tools::tool_output;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────

fn pages(n: usize) -> Vec<PageContent> {
    (0..n)
        .map(|i| PageContent::from_text(i, format!("body of page {}", i + 1)))
        .collect()
}

/// 1-based page number from the `[Page N]` user turn.
fn page_number(transcript: &[Message]) -> usize {
    transcript
        .iter()
        .find(|m| m.role == Role::User && m.content.starts_with("[Page "))
        .and_then(|m| m.content["[Page ".len()..].split(']').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn recording_sink() -> (SharedProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&events);
    let sink: SharedProgressSink = Arc::new(move |e: ProgressEvent| {
        store.lock().unwrap().push(e);
    });
    (sink, events)
}

fn phases_by_unit(events: &[ProgressEvent]) -> BTreeMap<usize, Vec<TaskPhase>> {
    let mut map: BTreeMap<usize, Vec<TaskPhase>> = BTreeMap::new();
    for e in events {
        map.entry(e.unit_index).or_default().push(e.phase);
    }
    map
}

/// Answers `Page N` after an optional per-page delay and counts calls.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<fn(usize) -> Duration>,
}

#[async_trait]
impl AgentCapability for Counting {
    async fn invoke(
        &self,
        transcript: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let page = page_number(transcript);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(page)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(AssistantTurn::content(format!("Page {page}")))
    }
}

/// Fails the listed 1-based pages; records every transcript it sees.
struct Scripted {
    replies: BTreeMap<usize, &'static str>,
    failing: Vec<usize>,
    seen: Mutex<Vec<(usize, Vec<Message>)>>,
}

impl Scripted {
    fn new(replies: &[(usize, &'static str)], failing: &[usize]) -> Self {
        Self {
            replies: replies.iter().copied().collect(),
            failing: failing.to_vec(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn transcript_of(&self, page: usize) -> Vec<Message> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| *p == page)
            .map(|(_, t)| t.clone())
            .unwrap_or_default()
    }

    fn pages_seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }
}

#[async_trait]
impl AgentCapability for Scripted {
    async fn invoke(
        &self,
        transcript: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError> {
        let page = page_number(transcript);
        self.seen.lock().unwrap().push((page, transcript.to_vec()));
        if self.failing.contains(&page) {
            return Err(AgentError::Unavailable(format!("page {page} is cursed")));
        }
        let reply = self.replies.get(&page).copied().unwrap_or("plain text");
        Ok(AssistantTurn::content(reply))
    }
}

/// Requests the `word_count` tool on every turn, forever.
#[derive(Default)]
struct ToolHungry {
    calls: AtomicUsize,
}

#[async_trait]
impl AgentCapability for ToolHungry {
    async fn invoke(
        &self,
        _transcript: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AssistantTurn::default().with_tool_call(format!("call_{n}"), "word_count", json!({})))
    }
}

/// Uses `word_count` once, then answers with the tool's result.
struct OneTool;

#[async_trait]
impl AgentCapability for OneTool {
    async fn invoke(
        &self,
        transcript: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError> {
        assert!(tools.iter().any(|t| t.name == "word_count"));
        match transcript.iter().rev().find(|m| m.role == Role::Tool) {
            Some(result) => Ok(AssistantTurn::content(format!("Words: {}", result.content))),
            None => Ok(AssistantTurn::default().with_tool_call("call_0", "word_count", json!({}))),
        }
    }
}

struct WordCount;

#[async_trait]
impl PageTool for WordCount {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "word_count".into(),
            description: "Count words in the page text".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, page: &PageContent, _arguments: &Value) -> Result<String, ToolError> {
        let words = page
            .text
            .as_deref()
            .map_or(0, |t| t.split_whitespace().count());
        Ok(tool_output(&json!(words)))
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_before_dispatch_invokes_no_agent() {
    let agent = Arc::new(Counting::default());
    let signal = CancellationSignal::new();
    signal.request_cancel();
    let (sink, events) = recording_sink();

    let doc = Processor::new(agent.clone())
        .run_parallel(pages(4), ProcessingConfig::default(), Some(signal), Some(sink))
        .await
        .unwrap();

    assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    assert_eq!(doc.status, RunStatus::Cancelled);
    assert!(doc.pages.iter().all(|p| p.status == PageStatus::Cancelled));
    assert!(doc.markdown.contains("<!-- page 4: cancelled -->"));

    let events = events.lock().unwrap();
    for (unit, phases) in phases_by_unit(&events) {
        assert_eq!(phases.last(), Some(&TaskPhase::Cancelled), "unit {unit}");
        assert!(!phases.contains(&TaskPhase::AwaitingAgent), "unit {unit}");
    }
}

#[tokio::test]
async fn cancelling_mid_serial_run_keeps_finished_pages() {
    let signal = CancellationSignal::new();
    let trigger = signal.clone();
    // Cancel as soon as the first page completes.
    let sink: SharedProgressSink = Arc::new(move |e: ProgressEvent| {
        if e.unit_index == 0 && e.phase == TaskPhase::Completed {
            trigger.request_cancel();
        }
    });
    let agent = Arc::new(Scripted::new(&[(1, "# Intro\n\nHello")], &[]));

    let doc = Processor::new(agent.clone())
        .run_serial(pages(3), ProcessingConfig::default(), Some(signal), Some(sink))
        .await
        .unwrap();

    assert_eq!(doc.status, RunStatus::Cancelled);
    assert_eq!(doc.fragments().count(), 1);
    assert!(doc.markdown.starts_with("# Intro"));
    assert_eq!(doc.pages[1].status, PageStatus::Cancelled);
    assert_eq!(doc.pages[2].status, PageStatus::Cancelled);
    assert_eq!(agent.pages_seen(), vec![1]);
}

// ── Parallel scheduling ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() {
    let agent = Arc::new(Counting {
        delay: Some(|_| Duration::from_millis(20)),
        ..Default::default()
    });
    let config = ProcessingConfig::builder()
        .concurrency_limit(3)
        .build()
        .unwrap();

    let doc = Processor::new(agent.clone())
        .run_parallel(pages(12), config, None, None)
        .await
        .unwrap();

    assert_eq!(doc.status, RunStatus::Completed);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 12);
    let peak = agent.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight was {peak}");
    assert!(peak > 1, "pages never overlapped");
}

#[tokio::test]
async fn page_order_survives_reversed_completion_order() {
    // Page 1 answers last, page 6 first.
    let agent = Arc::new(Counting {
        delay: Some(|page| Duration::from_millis((7 - page.min(7)) as u64 * 15)),
        ..Default::default()
    });

    let doc = Processor::new(agent)
        .run_parallel(pages(6), ProcessingConfig::default(), None, None)
        .await
        .unwrap();

    let order: Vec<usize> = doc.fragments().map(|f| f.page_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(
        doc.markdown,
        "Page 1\n\nPage 2\n\nPage 3\n\nPage 4\n\nPage 5\n\nPage 6\n"
    );
}

#[tokio::test]
async fn parallel_failures_are_isolated_by_default() {
    let agent = Arc::new(Scripted::new(&[], &[2]));
    let doc = Processor::new(agent)
        .run_parallel(pages(3), ProcessingConfig::default(), None, None)
        .await
        .unwrap();

    assert_eq!(doc.status, RunStatus::PartiallyFailed);
    assert!(doc.pages[0].is_completed());
    assert!(matches!(
        doc.pages[1].error(),
        Some(PageError::AgentInvocationFailed { page_index: 1, .. })
    ));
    assert!(doc.pages[2].is_completed());
    assert!(doc.markdown.contains("<!-- page 2: failed (AgentInvocationFailed)"));
}

#[tokio::test]
async fn parallel_fail_fast_stops_dispatching() {
    let agent = Arc::new(Scripted::new(&[], &[1]));
    let config = ProcessingConfig::builder()
        .concurrency_limit(1)
        .parallel_fail_fast(true)
        .build()
        .unwrap();

    let doc = Processor::new(agent.clone())
        .run_parallel(pages(4), config, None, None)
        .await
        .unwrap();

    assert_eq!(agent.pages_seen(), vec![1]);
    assert!(doc.pages[0].error().is_some());
    assert!(doc.pages[1..]
        .iter()
        .all(|p| matches!(p.status, PageStatus::NotAttempted { .. })));
    assert_eq!(doc.stats.not_attempted_pages, 3);
}

// ── Serial pipeline ──────────────────────────────────────────────────────

#[tokio::test]
async fn serial_pages_see_headings_open_before_them() {
    let agent = Arc::new(Scripted::new(
        &[
            (1, "# Chapter 1\n\n## Section A\n\nIntro text."),
            (2, "Section A continues here."),
            (3, "## Section B\n\nNew section."),
        ],
        &[],
    ));

    let doc = Processor::new(agent.clone())
        .run_serial(pages(3), ProcessingConfig::default(), None, None)
        .await
        .unwrap();
    assert_eq!(doc.status, RunStatus::Completed);
    assert_eq!(agent.pages_seen(), vec![1, 2, 3]);

    let outline_in = |page: usize| -> Option<String> {
        agent
            .transcript_of(page)
            .into_iter()
            .skip(1)
            .find(|m| m.role == Role::System && m.content.contains("still open"))
            .map(|m| m.content)
    };

    assert!(outline_in(1).is_none(), "first page starts with no context");
    let second = outline_in(2).expect("page 2 gets context");
    assert!(second.contains("# Chapter 1\n## Section A"), "got: {second}");
    let third = outline_in(3).expect("page 3 gets context");
    assert!(third.contains("## Section A"), "got: {third}");

    let titles: Vec<&str> = doc.toc.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter 1", "Section A", "Section B"]);
    assert_eq!(doc.toc[2].page_index, 2);
}

#[tokio::test]
async fn serial_fail_fast_aborts_remaining_pages() {
    let agent = Arc::new(Scripted::new(&[], &[2]));
    let doc = Processor::new(agent.clone())
        .run_serial(pages(3), ProcessingConfig::default(), None, None)
        .await
        .unwrap();

    assert_eq!(agent.pages_seen(), vec![1, 2]);
    assert!(doc.pages[0].is_completed());
    assert!(doc.pages[1].error().is_some());
    assert!(matches!(doc.pages[2].status, PageStatus::NotAttempted { .. }));
    match &doc.status {
        RunStatus::Aborted(abort) => {
            assert_eq!(abort.failed_page_index, 1);
            assert!(matches!(
                abort.cause,
                PageError::AgentInvocationFailed { page_index: 1, .. }
            ));
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    assert!(doc.markdown.starts_with("plain text"));
}

#[tokio::test]
async fn serial_continue_on_error_keeps_context_unchanged() {
    let agent = Arc::new(Scripted::new(
        &[(1, "# Part One\n\nText."), (3, "More of part one.")],
        &[2],
    ));
    let config = ProcessingConfig::builder()
        .failure_policy(FailurePolicy::ContinueOnError)
        .build()
        .unwrap();

    let doc = Processor::new(agent.clone())
        .run_serial(pages(3), config, None, None)
        .await
        .unwrap();

    assert_eq!(doc.status, RunStatus::PartiallyFailed);
    assert!(doc.pages[2].is_completed());
    let third = agent.transcript_of(3);
    assert!(third
        .iter()
        .any(|m| m.role == Role::System && m.content.contains("# Part One")));
}

// ── Agent loop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn runaway_tool_loop_stops_at_iteration_bound() {
    let agent = Arc::new(ToolHungry::default());
    let config = ProcessingConfig::builder()
        .max_iterations_per_page(3)
        .build()
        .unwrap();

    let doc = Processor::new(agent.clone())
        .with_tool(Arc::new(WordCount))
        .run_serial(pages(1), config, None, None)
        .await
        .unwrap();

    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        doc.pages[0].error(),
        Some(&PageError::ToolLoopExceeded {
            page_index: 0,
            max_iterations: 3,
        })
    );
}

#[tokio::test]
async fn tool_results_reach_the_agent() {
    let (sink, events) = recording_sink();
    let doc = Processor::new(Arc::new(OneTool))
        .with_tool(Arc::new(WordCount))
        .run_parallel(pages(2), ProcessingConfig::default(), None, Some(sink))
        .await
        .unwrap();

    assert_eq!(doc.status, RunStatus::Completed);
    let fragment = doc.pages[0].fragment().unwrap();
    assert_eq!(fragment.text, "Words: 4\n");
    assert_eq!(fragment.iterations, 2);

    let events = events.lock().unwrap();
    for (unit, phases) in phases_by_unit(&events) {
        assert_eq!(
            phases,
            vec![
                TaskPhase::Queued,
                TaskPhase::Dispatched,
                TaskPhase::AwaitingAgent,
                TaskPhase::ToolExecuting,
                TaskPhase::AwaitingAgent,
                TaskPhase::Completed,
            ],
            "unit {unit}"
        );
        assert!(phases.windows(2).all(|w| w[0].can_advance_to(w[1])));
    }
}

// ── Handles ──────────────────────────────────────────────────────────────

#[test]
fn handle_settles_exactly_once() {
    let handle: ResultHandle<u32> = ResultHandle::new("test");
    assert!(handle.resolve(1));
    assert!(!handle.resolve(2));
    assert!(!handle.reject(ProcessingError::Internal("late".into())));
    assert!(!handle.cancel());
    assert_eq!(handle.poll().value(), Some(&1));

    let cancelled: ResultHandle<u32> = ResultHandle::new("test");
    assert!(cancelled.cancel());
    assert!(!cancelled.resolve(3));
    assert!(matches!(cancelled.poll(), HandleState::Cancelled));
}

#[tokio::test]
async fn handle_is_returned_before_work_finishes() {
    let agent = Arc::new(Counting {
        delay: Some(|_| Duration::from_millis(100)),
        ..Default::default()
    });
    let handle = Processor::new(agent)
        .start_parallel(pages(2), ProcessingConfig::default(), None, None)
        .unwrap();

    assert!(handle.poll().is_pending());
    let state = handle
        .wait_timeout(Duration::from_secs(5))
        .await
        .expect("run finishes");
    assert_eq!(state.value().map(|d| d.stats.completed_pages), Some(2));
}

// ── End-to-end ───────────────────────────────────────────────────────────

/// Converts `E2E_PDF` (default `test_cases/sample.pdf`) with a live provider.
/// Requires `E2E_ENABLED=1`, pdfium and an API key.
#[tokio::test]
async fn e2e_convert_real_pdf_serially() {
    use agentic_pdf2md::{convert, ConvertOptions, LlmAgent, PageSelection, PdfSourceConfig, RunMode};

    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let path = std::env::var("E2E_PDF").unwrap_or_else(|_| {
        format!("{}/test_cases/sample.pdf", env!("CARGO_MANIFEST_DIR"))
    });
    if !std::path::Path::new(&path).exists() {
        println!("SKIP — test file not found: {path}");
        return;
    }

    let agent = Arc::new(LlmAgent::builder().build().expect("provider configured"));
    let options = ConvertOptions {
        source: PdfSourceConfig::builder()
            .pages(PageSelection::Range(1, 2))
            .build()
            .unwrap(),
        mode: RunMode::Serial,
        ..Default::default()
    };
    let output = convert(&path, &Processor::new(agent), &options)
        .await
        .expect("conversion runs");

    let md = &output.document.markdown;
    assert!(!md.trim().is_empty());
    assert!(md.ends_with('\n'));
    assert!(!md.starts_with("```"));
    assert_eq!(output.document.pages.len(), output.source_page_numbers.len());
}
