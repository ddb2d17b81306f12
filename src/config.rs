//! Configuration types for agent-driven page processing.
//!
//! All orchestration behaviour is controlled through [`ProcessingConfig`],
//! built via [`ProcessingConfigBuilder`]. Rendering options for the PDF page
//! source live separately in [`crate::source::PdfSourceConfig`] and provider
//! options in [`crate::agent::llm::LlmAgentBuilder`], so the same processing
//! config can drive pages from any source through any agent.

use crate::error::ProcessingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one processing request (parallel or serial).
///
/// # Example
/// ```rust
/// use agentic_pdf2md::{FailurePolicy, ProcessingConfig};
/// use std::time::Duration;
///
/// let config = ProcessingConfig::builder()
///     .concurrency_limit(4)
///     .max_iterations_per_page(6)
///     .failure_policy(FailurePolicy::ContinueOnError)
///     .deadline(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency_limit, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum pages in flight at once (parallel mode only). Must be ≥ 1. Default: 10.
    ///
    /// The agent backend may have its own ceiling (a local model server often
    /// serves one request at a time); this value is never exceeded.
    pub concurrency_limit: usize,

    /// Maximum agent invocations per page. Must be ≥ 1. Default: 8.
    ///
    /// A page whose agent is still requesting tools on its last allowed
    /// invocation fails with `ToolLoopExceeded`.
    pub max_iterations_per_page: usize,

    /// What a serial run does when a page fails. Default: [`FailurePolicy::FailFast`].
    pub failure_policy: FailurePolicy,

    /// Parallel mode: stop dispatching new pages after the first page failure.
    /// Default: false (failures are collected).
    pub parallel_fail_fast: bool,

    /// Optional wall-clock budget for the whole request, measured from start.
    pub deadline: Option<Duration>,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Serial mode: also inject the tail of the previous page's Markdown.
    /// Default: false (only the heading context is injected).
    pub carry_previous_page: bool,

    /// Page separator in assembled output. Default: None.
    pub page_separator: PageSeparator,

    /// Prepend a rendered table of contents to the assembled Markdown. Default: false.
    pub include_toc: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            max_iterations_per_page: 8,
            failure_policy: FailurePolicy::default(),
            parallel_fail_fast: false,
            deadline: None,
            system_prompt: None,
            carry_previous_page: false,
            page_separator: PageSeparator::default(),
            include_toc: false,
        }
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the invariants every run relies on.
    ///
    /// Called by `start_*` as well as by the builder, because the fields are
    /// public and a config can be mutated after `build()`.
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.concurrency_limit == 0 {
            return Err(ProcessingError::InvalidConfiguration(
                "concurrency_limit must be ≥ 1".into(),
            ));
        }
        if self.max_iterations_per_page == 0 {
            return Err(ProcessingError::InvalidConfiguration(
                "max_iterations_per_page must be ≥ 1".into(),
            ));
        }
        if let Some(d) = self.deadline {
            if d.is_zero() {
                return Err(ProcessingError::InvalidConfiguration(
                    "deadline must be a positive duration".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`ProcessingConfig`].
#[derive(Debug)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.concurrency_limit = n;
        self
    }

    pub fn max_iterations_per_page(mut self, n: usize) -> Self {
        self.config.max_iterations_per_page = n;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn parallel_fail_fast(mut self, v: bool) -> Self {
        self.config.parallel_fail_fast = v;
        self
    }

    pub fn deadline(mut self, d: Duration) -> Self {
        self.config.deadline = Some(d);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn carry_previous_page(mut self, v: bool) -> Self {
        self.config.carry_previous_page = v;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_toc(mut self, v: bool) -> Self {
        self.config.include_toc = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, ProcessingError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a serial run reacts to a failed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Abort the remaining pages; the run reports `SerialAbortedOnFailure`. (default)
    #[default]
    FailFast,
    /// Record the failure, keep the heading context unchanged, and continue.
    ContinueOnError,
}

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
