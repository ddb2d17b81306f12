//! Page content handed to the agent, as produced by a page source.
//!
//! A [`PageContent`] is opaque to the schedulers: they only move it into the
//! page task that owns it. The task turns it into the first user turn of the
//! transcript via [`PageContent::to_llm_input`].

use serde::{Deserialize, Serialize};

/// A base64-encoded image attached to a transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// Base64 payload, without a data-URI prefix.
    pub data: String,
    /// e.g. `image/png`.
    pub mime_type: String,
}

impl PageImage {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// An image object embedded in a page, addressable by the agent through tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedImage {
    /// Stable identifier used in `[IMAGE: id]` placeholders.
    pub id: String,
    /// Bounding box in page points: (left, bottom, right, top).
    pub bbox: (f32, f32, f32, f32),
    pub image: PageImage,
}

/// Everything the agent gets to see about one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// 0-based page index within the request.
    pub page_index: usize,
    /// Extracted text layer, if any.
    pub text: Option<String>,
    /// Rendered screenshot of the whole page.
    pub screenshot: Option<PageImage>,
    /// Image objects found on the page.
    pub images: Vec<EmbeddedImage>,
}

impl PageContent {
    /// A text-only page.
    pub fn from_text(page_index: usize, text: impl Into<String>) -> Self {
        Self {
            page_index,
            text: Some(text.into()),
            screenshot: None,
            images: Vec::new(),
        }
    }

    pub fn with_screenshot(mut self, image: PageImage) -> Self {
        self.screenshot = Some(image);
        self
    }

    pub fn with_image(mut self, image: EmbeddedImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn image(&self, id: &str) -> Option<&EmbeddedImage> {
        self.images.iter().find(|i| i.id == id)
    }

    /// Compact textual form of the page for the first user turn.
    ///
    /// Images are listed as `[IMAGE: id]` placeholders; the agent can ask for
    /// a description of any of them through the `describe_image` tool.
    pub fn to_llm_input(&self, include_layout_hints: bool) -> String {
        let mut lines = vec![format!("[Page {}]", self.page_index + 1)];

        if let Some(text) = self.text.as_deref().map(str::trim) {
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }

        if !self.images.is_empty() {
            lines.push("\n[Images on this page:]".to_string());
            for img in &self.images {
                lines.push(format!("[IMAGE: {}]", img.id));
                if include_layout_hints {
                    lines.push(format!("  Position: {:?}", img.bbox));
                }
            }
        }

        lines.join("\n")
    }
}
