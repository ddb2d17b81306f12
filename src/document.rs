//! Output types: per-page fragments and outcomes, and the assembled document.

use crate::error::{PageError, SerialAbortedOnFailure};
use crate::heading::HeadingEvent;
use serde::{Deserialize, Serialize};

/// The Markdown attributable to exactly one page. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFragment {
    /// 0-based page index.
    pub page_index: usize,
    /// Cleaned Markdown for the page.
    pub text: String,
    /// Heading opens/closes, relative to the context the page started in.
    pub heading_events: Vec<HeadingEvent>,
    /// Agent invocations the page needed.
    pub iterations: usize,
}

/// Terminal status of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageStatus {
    Completed(PageFragment),
    Failed(PageError),
    /// The signal fired before the page was dispatched.
    Cancelled,
    /// The run stopped before reaching this page (fail-fast, or no outcome recorded).
    NotAttempted { reason: String },
}

/// Outcome of one page, as reported in the assembled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page_index: usize,
    pub status: PageStatus,
    /// Wall-clock time from dispatch to terminal state; 0 if never dispatched.
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn fragment(&self) -> Option<&PageFragment> {
        match &self.status {
            PageStatus::Completed(f) => Some(f),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.status {
            PageStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, PageStatus::Completed(_))
    }

    /// Cancelled before dispatch, or cancelled at a suspension point.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.status,
            PageStatus::Cancelled | PageStatus::Failed(PageError::OperationCancelled { .. })
        )
    }
}

/// Which strategy produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    Parallel,
    Serial,
}

/// Overall status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every page completed.
    Completed,
    /// At least one page failed; the run itself went to the end.
    PartiallyFailed,
    /// Serial `FailFast` stopped at a failed page.
    Aborted(SerialAbortedOnFailure),
    /// The cancellation signal stopped the run.
    Cancelled,
}

/// One table-of-contents line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    pub page_index: usize,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub completed_pages: usize,
    pub failed_pages: usize,
    pub cancelled_pages: usize,
    pub not_attempted_pages: usize,
    pub total_iterations: usize,
    pub duration_ms: u64,
}

/// The assembled result of one run.
///
/// `pages` holds exactly one outcome per page index in `0..stats.total_pages`,
/// in ascending order, whatever order pages completed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDocument {
    pub mode: RunMode,
    /// Full Markdown, with placeholders for pages that produced no fragment.
    pub markdown: String,
    pub pages: Vec<PageOutcome>,
    pub toc: Vec<TocEntry>,
    pub status: RunStatus,
    pub stats: DocumentStats,
}

impl AggregatedDocument {
    /// Successful fragments, in page order.
    pub fn fragments(&self) -> impl Iterator<Item = &PageFragment> {
        self.pages.iter().filter_map(PageOutcome::fragment)
    }

    /// Page-local failures, in page order.
    pub fn failures(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(PageOutcome::error)
    }

    pub fn page(&self, page_index: usize) -> Option<&PageOutcome> {
        self.pages.get(page_index)
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Render the table of contents as a Markdown list.
    pub fn render_toc(&self) -> String {
        render_toc(&self.toc)
    }
}

pub(crate) fn render_toc(toc: &[TocEntry]) -> String {
    let Some(min_level) = toc.iter().map(|e| e.level).min() else {
        return String::new();
    };
    let mut out = String::from("## Contents\n\n");
    for entry in toc {
        let indent = "  ".repeat((entry.level - min_level) as usize);
        out.push_str(&format!(
            "{}- {} (p. {})\n",
            indent,
            entry.title,
            entry.page_index + 1
        ));
    }
    out
}
