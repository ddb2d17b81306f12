//! Heading structure: events extracted from a fragment and the open-heading
//! stack carried across pages in serial mode.
//!
//! A Markdown heading of level `L` implicitly closes every open heading of
//! level `≥ L` before opening itself. [`extract_heading_events`] makes those
//! closes explicit relative to a starting [`HeadingContext`], so replaying
//! the events of consecutive pages reproduces the document's outline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opening or closing of one heading level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingEvent {
    Open { level: u8, title: String },
    Close { level: u8, title: String },
}

/// A heading that is still open at a page boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHeading {
    pub level: u8,
    pub title: String,
}

/// Stack of currently open headings, outermost first.
///
/// Owned by the serial pipeline and mutated only between pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingContext {
    open: Vec<OpenHeading>,
}

impl HeadingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_headings(&self) -> &[OpenHeading] {
        &self.open
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// The innermost open heading.
    pub fn current(&self) -> Option<&OpenHeading> {
        self.open.last()
    }

    /// Title of the open heading at `level`, if one is open.
    pub fn title_at(&self, level: u8) -> Option<&str> {
        self.open
            .iter()
            .find(|h| h.level == level)
            .map(|h| h.title.as_str())
    }

    /// Replay events in order.
    pub fn apply(&mut self, events: &[HeadingEvent]) {
        for event in events {
            match event {
                HeadingEvent::Open { level, title } => {
                    self.close_from(*level);
                    self.open.push(OpenHeading {
                        level: *level,
                        title: title.clone(),
                    });
                }
                HeadingEvent::Close { level, .. } => self.close_from(*level),
            }
        }
    }

    fn close_from(&mut self, level: u8) {
        while self.open.last().is_some_and(|h| h.level >= level) {
            self.open.pop();
        }
    }
}

impl fmt::Display for HeadingContext {
    /// One line per open heading, e.g. `# Intro` / `## Scope`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, h) in self.open.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{} {}", "#".repeat(h.level as usize), h.title)?;
        }
        Ok(())
    }
}

static RE_ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").unwrap());

/// Extract heading events from `markdown`, starting from `context`.
///
/// Headings inside fenced code blocks are ignored.
pub fn extract_heading_events(markdown: &str, context: &HeadingContext) -> Vec<HeadingEvent> {
    let mut working = context.open.clone();
    let mut events = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(caps) = RE_ATX_HEADING.captures(line) else {
            continue;
        };
        let level = caps[1].len() as u8;
        let title = caps[2].trim().to_string();
        if title.is_empty() {
            continue;
        }
        while working.last().is_some_and(|top| top.level >= level) {
            if let Some(closed) = working.pop() {
                events.push(HeadingEvent::Close {
                    level: closed.level,
                    title: closed.title,
                });
            }
        }
        working.push(OpenHeading {
            level,
            title: title.clone(),
        });
        events.push(HeadingEvent::Open { level, title });
    }

    events
}
