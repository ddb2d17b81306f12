//! # agentic-pdf2md
//!
//! Convert PDF documents to Markdown by running one tool-using LLM agent
//! conversation per page, either in parallel or serially with a heading
//! outline carried from page to page.
//!
//! ## Why agents per page?
//!
//! A single vision call per page works for simple layouts, but figures,
//! charts and embedded images need a second look. Each page here is a small,
//! bounded conversation: the agent sees the page's text layer and screenshot,
//! may call tools (for example `describe_image` on an embedded figure), and
//! answers with the page's Markdown.
//!
//! ## Two strategies
//!
//! | Mode | Throughput | Heading hierarchy | Use when |
//! |------|-----------|-------------------|----------|
//! | Parallel | bounded pool of `concurrency_limit` pages | per page | speed matters |
//! | Serial | one page at a time | consistent across pages | sections span pages |
//!
//! Both return a [`ResultHandle`] immediately, report [`ProgressEvent`]s to a
//! [`ProgressSink`], honour a shared [`CancellationSignal`], and produce an
//! [`AggregatedDocument`] whose page order never depends on completion order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Source    resolve file/URL, render screenshots, text layer, images
//!  ├─ 2. Schedule  parallel pool  │  serial pipeline + heading context
//!  ├─ 3. Agent     per-page loop: invoke → tools → invoke … → Markdown
//!  ├─ 4. Polish    fence/whitespace cleanup, heading events
//!  └─ 5. Assemble  page order, placeholders, table of contents, status
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentic_pdf2md::{convert, ConvertOptions, LlmAgent, Processor, RunMode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let agent = Arc::new(LlmAgent::builder().build()?);
//!     let processor = Processor::new(agent);
//!     let options = ConvertOptions { mode: RunMode::Serial, ..Default::default() };
//!     let output = convert("document.pdf", &processor, &options).await?;
//!     println!("{}", output.document.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `agentic-pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod assemble;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod handle;
pub mod heading;
pub mod page;
pub mod postprocess;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod scheduler;
pub mod serial;
pub mod source;
pub mod task;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::llm::{LlmAgent, LlmAgentBuilder, LlmOptions};
pub use agent::{AgentCapability, AssistantTurn, Message, Role, ToolCall, ToolDescriptor};
pub use assemble::{assemble, AssemblyOptions};
pub use cancel::{CancelReason, CancellationSignal};
pub use config::{FailurePolicy, PageSeparator, ProcessingConfig, ProcessingConfigBuilder};
pub use convert::{convert, convert_from_bytes, convert_to_file, ConversionOutput, ConvertOptions};
pub use document::{
    AggregatedDocument, DocumentStats, PageFragment, PageOutcome, PageStatus, RunMode, RunStatus,
    TocEntry,
};
pub use error::{AgentError, PageError, ProcessingError, SerialAbortedOnFailure, ToolError};
pub use handle::{HandleState, ResultHandle, WaitTimedOut};
pub use heading::{HeadingContext, HeadingEvent, OpenHeading};
pub use page::{EmbeddedImage, PageContent, PageImage};
pub use process::{DualHandles, Processor};
pub use progress::{
    progress_channel, ChannelProgressSink, NoopProgressSink, ProgressEvent, ProgressReceiver,
    ProgressSink, SharedProgressSink, TaskPhase,
};
pub use scheduler::ParallelScheduler;
pub use serial::{SerialPipeline, SerialRun};
pub use source::{
    inspect, load_pages, load_pages_from_bytes, DocumentMetadata, PageSelection, PdfSourceConfig,
};
pub use task::PageTask;
pub use tools::{DescribeImageTool, PageTool, ToolRegistry};
