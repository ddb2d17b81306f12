//! Deterministic assembly of per-page outcomes into one document.
//!
//! Assembly is a pure function: outcomes may arrive in any order (parallel
//! completion order varies run to run), and the result depends only on their
//! content. Every page index in `0..total` appears exactly once in the output;
//! pages without a fragment are rendered as explicit HTML-comment
//! placeholders so the page count of the Markdown stays verifiable.

use crate::config::PageSeparator;
use crate::document::{
    render_toc, AggregatedDocument, DocumentStats, PageOutcome, PageStatus, RunMode, RunStatus,
    TocEntry,
};
use crate::error::SerialAbortedOnFailure;
use crate::heading::HeadingEvent;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Rendering options for [`assemble`].
#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    pub separator: PageSeparator,
    pub include_toc: bool,
}

/// Merge outcomes into an [`AggregatedDocument`].
///
/// * Outcomes are ordered by `page_index`; a duplicate index keeps the first
///   outcome seen and indices `≥ total` are discarded.
/// * Indices in `0..total` with no outcome become `NotAttempted`.
/// * `abort` is set by a serial run that stopped under `FailFast`.
pub fn assemble(
    mode: RunMode,
    outcomes: Vec<PageOutcome>,
    total: usize,
    options: &AssemblyOptions,
    abort: Option<SerialAbortedOnFailure>,
    elapsed: Duration,
) -> AggregatedDocument {
    let mut by_index: BTreeMap<usize, PageOutcome> = BTreeMap::new();
    for outcome in outcomes {
        if outcome.page_index >= total {
            warn!(
                page_index = outcome.page_index,
                total, "Discarding outcome outside the page range"
            );
            continue;
        }
        if by_index.contains_key(&outcome.page_index) {
            warn!(
                page_index = outcome.page_index,
                "Duplicate outcome for page; keeping the first"
            );
            continue;
        }
        by_index.insert(outcome.page_index, outcome);
    }

    let pages: Vec<PageOutcome> = (0..total)
        .map(|idx| {
            by_index.remove(&idx).unwrap_or_else(|| PageOutcome {
                page_index: idx,
                status: PageStatus::NotAttempted {
                    reason: "no outcome recorded".into(),
                },
                duration_ms: 0,
            })
        })
        .collect();

    let toc = build_toc(&pages);

    let mut body = String::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            body.push_str(&options.separator.render(page.page_index + 1));
        }
        match &page.status {
            PageStatus::Completed(fragment) => body.push_str(fragment.text.trim_end()),
            _ => body.push_str(&placeholder(page)),
        }
    }

    let markdown = if options.include_toc && !toc.is_empty() {
        format!("{}\n{}\n", render_toc(&toc), body)
    } else {
        format!("{}\n", body)
    };

    let stats = compute_stats(&pages, elapsed);
    let status = run_status(&pages, abort);
    debug!(
        ?mode,
        ?status,
        completed = stats.completed_pages,
        total,
        "Document assembled"
    );

    AggregatedDocument {
        mode,
        markdown,
        pages,
        toc,
        status,
        stats,
    }
}

/// Placeholder marker for a page without a fragment.
pub fn placeholder(page: &PageOutcome) -> String {
    let num = page.page_index + 1;
    match &page.status {
        PageStatus::Completed(_) => String::new(),
        PageStatus::Failed(e) => format!(
            "<!-- page {}: failed ({}): {} -->",
            num,
            e.kind(),
            sanitize_comment(&e.to_string())
        ),
        PageStatus::Cancelled => format!("<!-- page {}: cancelled -->", num),
        PageStatus::NotAttempted { reason } => format!(
            "<!-- page {}: not attempted: {} -->",
            num,
            sanitize_comment(reason)
        ),
    }
}

// "--" would terminate the HTML comment early. A single pass leaves "--"
// behind in runs of three or more dashes.
fn sanitize_comment(s: &str) -> String {
    let mut out = s.replace('\n', " ");
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    out
}

/// Replay heading opens in page order. Only completed pages contribute.
fn build_toc(pages: &[PageOutcome]) -> Vec<TocEntry> {
    pages
        .iter()
        .filter_map(|p| p.fragment())
        .flat_map(|f| {
            f.heading_events.iter().filter_map(move |e| match e {
                HeadingEvent::Open { level, title } => Some(TocEntry {
                    level: *level,
                    title: title.clone(),
                    page_index: f.page_index,
                }),
                HeadingEvent::Close { .. } => None,
            })
        })
        .collect()
}

fn compute_stats(pages: &[PageOutcome], elapsed: Duration) -> DocumentStats {
    let mut stats = DocumentStats {
        total_pages: pages.len(),
        duration_ms: elapsed.as_millis() as u64,
        ..Default::default()
    };
    for page in pages {
        match &page.status {
            PageStatus::Completed(f) => {
                stats.completed_pages += 1;
                stats.total_iterations += f.iterations;
            }
            PageStatus::Failed(_) if page.is_cancelled() => stats.cancelled_pages += 1,
            PageStatus::Failed(_) => stats.failed_pages += 1,
            PageStatus::Cancelled => stats.cancelled_pages += 1,
            PageStatus::NotAttempted { .. } => stats.not_attempted_pages += 1,
        }
    }
    stats
}

fn run_status(pages: &[PageOutcome], abort: Option<SerialAbortedOnFailure>) -> RunStatus {
    if let Some(abort) = abort {
        return RunStatus::Aborted(abort);
    }
    if pages.iter().any(PageOutcome::is_cancelled) {
        return RunStatus::Cancelled;
    }
    if pages.iter().all(PageOutcome::is_completed) {
        RunStatus::Completed
    } else {
        RunStatus::PartiallyFailed
    }
}
