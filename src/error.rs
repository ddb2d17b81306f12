//! Error types for the agentic-pdf2md library.
//!
//! Four error types, one per boundary:
//!
//! * [`ProcessingError`] — **Fatal**: the request cannot start or cannot be
//!   delivered (bad input file, wrong password, invalid configuration,
//!   provider not configured). Returned synchronously from `start_*` and the
//!   `convert*` helpers, before any page is dispatched.
//!
//! * [`PageError`] — **Page-local**: one page's agent loop ended badly.
//!   Stored inside [`crate::document::PageStatus::Failed`] so a single bad
//!   page never crashes a scheduler or hides its siblings.
//!
//! * [`AgentError`] — returned by an [`crate::agent::AgentCapability`]. The
//!   page task converts it into [`PageError::AgentInvocationFailed`].
//!
//! * [`ToolError`] — returned by a [`crate::tools::PageTool`]. Tool errors are
//!   reported back to the agent as an error tool result, not as page failures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the agentic-pdf2md library.
#[derive(Debug, Error)]
pub enum ProcessingError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("No pages selected (document has {total} pages)")]
    EmptySelection { total: usize },

    /// pdfium returned an error while preparing a page.
    #[error("Failed to prepare page {page}: {detail}")]
    PagePreparationFailed { page: usize, detail: String },

    // ── Agent errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Rejected before any page was dispatched.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A page-local error, recorded in the page's outcome.
///
/// Page numbers in messages are 1-indexed; the `page_index` fields are the
/// 0-based positions used everywhere else in the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The agent capability failed or returned an unusable turn.
    #[error("Page {}: agent invocation failed: {detail}", page_index + 1)]
    AgentInvocationFailed { page_index: usize, detail: String },

    /// The agent kept requesting tools past the iteration bound.
    #[error("Page {}: agent still requesting tools after {max_iterations} iterations", page_index + 1)]
    ToolLoopExceeded {
        page_index: usize,
        max_iterations: usize,
    },

    /// The signal fired at a suspension point inside the page's loop.
    #[error("Page {}: operation cancelled", page_index + 1)]
    OperationCancelled { page_index: usize },
}

impl PageError {
    /// 0-based index of the page this error belongs to.
    pub fn page_index(&self) -> usize {
        match self {
            PageError::AgentInvocationFailed { page_index, .. }
            | PageError::ToolLoopExceeded { page_index, .. }
            | PageError::OperationCancelled { page_index } => *page_index,
        }
    }

    /// Short machine-readable kind, used in placeholders and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            PageError::AgentInvocationFailed { .. } => "AgentInvocationFailed",
            PageError::ToolLoopExceeded { .. } => "ToolLoopExceeded",
            PageError::OperationCancelled { .. } => "OperationCancelled",
        }
    }
}

/// Pipeline-level abort reported by a serial run under `FailFast`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Serial run aborted at page {}: {cause}", failed_page_index + 1)]
pub struct SerialAbortedOnFailure {
    pub failed_page_index: usize,
    pub cause: PageError,
}

/// Error returned by an [`crate::agent::AgentCapability`].
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Provider unreachable or the call failed after the adapter's own retries.
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but the turn could not be interpreted.
    #[error("malformed agent response: {0}")]
    MalformedResponse(String),

    /// The provider refused the request (auth, content filter, bad request).
    #[error("agent rejected the request: {0}")]
    Rejected(String),
}

/// Error returned by a [`crate::tools::PageTool`].
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {detail}")]
    InvalidArguments { tool: String, detail: String },

    #[error("tool '{tool}' failed: {detail}")]
    Failed { tool: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_error_display_is_one_indexed() {
        let e = PageError::ToolLoopExceeded {
            page_index: 2,
            max_iterations: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"), "got: {msg}");
        assert!(msg.contains("5 iterations"), "got: {msg}");
        assert_eq!(e.page_index(), 2);
        assert_eq!(e.kind(), "ToolLoopExceeded");
    }

    #[test]
    fn serial_abort_display_names_cause() {
        let e = SerialAbortedOnFailure {
            failed_page_index: 1,
            cause: PageError::AgentInvocationFailed {
                page_index: 1,
                detail: "503".into(),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("page 2"), "got: {msg}");
        assert!(msg.contains("503"), "got: {msg}");
    }

    #[test]
    fn invalid_configuration_display() {
        let e = ProcessingError::InvalidConfiguration("concurrency_limit must be ≥ 1".into());
        assert!(e.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::OperationCancelled { page_index: 0 };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
