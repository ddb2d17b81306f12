//! PDF page source: turn a path, URL or byte buffer into [`PageContent`]s.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──────────────▶ encode ──▶ PageContent
//! (URL/path)  (pdfium: bitmap,       (base64     (text, screenshot,
//!              text layer, images)    PNG)        embedded images)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`] — rasterise selected pages, extract their text layer and
//!    image objects; runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`] — PNG-encode and base64-wrap images for the agent transcript
//!
//! All failures here are input errors, raised before any page is scheduled.

pub mod encode;
pub mod input;
pub mod render;

use crate::error::ProcessingError;
use crate::page::PageContent;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

// ── Configuration ────────────────────────────────────────────────────────

/// How pages are extracted from a PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSourceConfig {
    /// Rendering resolution in DPI. Range: 72–400. Default: 150.
    pub dpi: u32,
    /// Longest edge of a page screenshot, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
    /// Password for encrypted PDFs.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Which pages to load. Default: all.
    pub pages: PageSelection,
    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
    /// Attach a rendered screenshot to each page. Default: true.
    pub render_screenshots: bool,
    /// Extract the text layer. Default: true.
    pub extract_text: bool,
    /// Extract embedded image objects so tools can describe them. Default: true.
    pub extract_images: bool,
    /// Longest edge of an extracted embedded image, in pixels. Default: 1024.
    pub max_image_pixels: u32,
}

impl Default for PdfSourceConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            pages: PageSelection::default(),
            download_timeout_secs: 120,
            render_screenshots: true,
            extract_text: true,
            extract_images: true,
            max_image_pixels: 1024,
        }
    }
}

impl PdfSourceConfig {
    pub fn builder() -> PdfSourceConfigBuilder {
        PdfSourceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PdfSourceConfig`].
#[derive(Debug)]
pub struct PdfSourceConfigBuilder {
    config: PdfSourceConfig,
}

impl PdfSourceConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(64);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn render_screenshots(mut self, v: bool) -> Self {
        self.config.render_screenshots = v;
        self
    }

    pub fn extract_text(mut self, v: bool) -> Self {
        self.config.extract_text = v;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn max_image_pixels(mut self, px: u32) -> Self {
        self.config.max_image_pixels = px.max(16);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PdfSourceConfig, ProcessingError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ProcessingError::InvalidConfiguration(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if !c.render_screenshots && !c.extract_text {
            return Err(ProcessingError::InvalidConfiguration(
                "at least one of screenshots or text extraction must be enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Specifies which pages of the PDF to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// One page (1-indexed).
    Single(usize),
    /// Contiguous pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Sorted, deduplicated 0-indexed page numbers within `0..total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let in_range = |p: &usize| (1..=total_pages).contains(p);
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => Some(*p).filter(in_range).map(|p| p - 1).into_iter().collect(),
            PageSelection::Range(start, end) => {
                ((*start).max(1) - 1..(*end).min(total_pages)).collect()
            }
            PageSelection::Set(pages) => pages.iter().filter(|p| in_range(p)).map(|p| p - 1).collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Parse `"all"`, `"5"`, `"1-10"`, `"1,3,7"` or a mix like `"1-3,5"`.
    pub fn parse(s: &str) -> Result<Self, ProcessingError> {
        let s = s.trim();
        let bad = |what: &str| {
            ProcessingError::InvalidConfiguration(format!("invalid page selection '{s}': {what}"))
        };
        let number = |t: &str| -> Result<usize, ProcessingError> {
            let n: usize = t.trim().parse().map_err(|_| bad("expected page numbers"))?;
            if n == 0 {
                return Err(bad("pages are 1-indexed"));
            }
            Ok(n)
        };

        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let range = |part: &str| -> Result<Option<(usize, usize)>, ProcessingError> {
            let Some((a, b)) = part.split_once('-') else {
                return Ok(None);
            };
            let (start, end) = (number(a)?, number(b)?);
            if start > end {
                return Err(bad("range start is after its end"));
            }
            Ok(Some((start, end)))
        };

        if !s.contains(',') {
            return Ok(match range(s)? {
                Some((start, end)) => PageSelection::Range(start, end),
                None => PageSelection::Single(number(s)?),
            });
        }
        let mut pages = Vec::new();
        for part in s.split(',') {
            match range(part)? {
                Some((start, end)) => pages.extend(start..=end),
                None => pages.push(number(part)?),
            }
        }
        Ok(PageSelection::Set(pages))
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// Document-level metadata read from the PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Pages ready for processing.
#[derive(Debug, Clone)]
pub struct LoadedPages {
    /// One entry per selected page; `page_index` is the position in this list.
    pub pages: Vec<PageContent>,
    /// 1-based page numbers in the PDF, parallel to `pages`.
    pub source_page_numbers: Vec<usize>,
    pub metadata: DocumentMetadata,
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Load the selected pages of a local PDF or an HTTP(S) URL.
pub async fn load_pages(input: &str, config: &PdfSourceConfig) -> Result<LoadedPages, ProcessingError> {
    let start = Instant::now();
    let resolved = input::resolve_input(input, config.download_timeout_secs).await?;
    let loaded = load_resolved(&resolved, config).await?;
    info!(
        "Loaded {} page(s) from '{}' in {}ms",
        loaded.pages.len(),
        input,
        start.elapsed().as_millis()
    );
    Ok(loaded)
}

/// Load the selected pages of an in-memory PDF.
pub async fn load_pages_from_bytes(
    bytes: &[u8],
    config: &PdfSourceConfig,
) -> Result<LoadedPages, ProcessingError> {
    let resolved = input::resolve_bytes(bytes).await?;
    load_resolved(&resolved, config).await
}

/// Read metadata only; no page is rendered.
pub async fn inspect(input: &str, password: Option<&str>) -> Result<DocumentMetadata, ProcessingError> {
    let resolved = input::resolve_input(input, PdfSourceConfig::default().download_timeout_secs).await?;
    render::extract_metadata(resolved.path(), password).await
}

async fn load_resolved(
    resolved: &input::ResolvedInput,
    config: &PdfSourceConfig,
) -> Result<LoadedPages, ProcessingError> {
    let metadata = render::extract_metadata(resolved.path(), config.password.as_deref()).await?;
    let indices = config.pages.to_indices(metadata.page_count);
    if indices.is_empty() {
        return Err(ProcessingError::EmptySelection {
            total: metadata.page_count,
        });
    }
    debug!("Selected {} of {} pages", indices.len(), metadata.page_count);

    let extracted = render::extract_pages(resolved.path(), config, &indices).await?;

    let mut pages = Vec::with_capacity(extracted.len());
    let mut source_page_numbers = Vec::with_capacity(extracted.len());
    for (position, page) in extracted.into_iter().enumerate() {
        source_page_numbers.push(page.source_index + 1);
        pages.push(page.into_content(position));
    }

    Ok(LoadedPages {
        pages,
        source_page_numbers,
        metadata,
    })
}
