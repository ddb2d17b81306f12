//! Page extraction via pdfium: screenshot, text layer and image objects.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. All work here runs on the blocking pool so Tokio
//! worker threads never stall while a page renders.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI is over 7,000 px wide.
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! keeping memory bounded and the image in the range vision models handle.
//!
//! ## Locating pdfium
//!
//! `PDFIUM_LIB_PATH` names a directory holding the platform library;
//! otherwise the system library search path is used.

use super::encode::encode_png;
use super::{DocumentMetadata, PdfSourceConfig};
use crate::error::ProcessingError;
use crate::page::{EmbeddedImage, PageContent, PageImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One page as read from the PDF, already encoded for the transcript.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// 0-based index of the page in the PDF.
    pub source_index: usize,
    pub text: Option<String>,
    pub screenshot: Option<PageImage>,
    pub images: Vec<EmbeddedImage>,
}

impl ExtractedPage {
    /// Re-index the page to its position within the request.
    pub fn into_content(self, page_index: usize) -> PageContent {
        PageContent {
            page_index,
            text: self.text,
            screenshot: self.screenshot,
            images: self.images,
        }
    }
}

/// Extract the given 0-based pages.
pub async fn extract_pages(
    pdf_path: &Path,
    config: &PdfSourceConfig,
    page_indices: &[usize],
) -> Result<Vec<ExtractedPage>, ProcessingError> {
    let path = pdf_path.to_path_buf();
    let config = config.clone();
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || extract_pages_blocking(&path, &config, &indices))
        .await
        .map_err(|e| ProcessingError::Internal(format!("Render task panicked: {}", e)))?
}

/// Read document metadata without rendering.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, ProcessingError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| ProcessingError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn bind_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = match pdfium_lib_dir() {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        ProcessingError::Internal(format!(
            "pdfium library not found ({:?}); install it or set PDFIUM_LIB_PATH",
            e
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ProcessingError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{:?}", e);
        let path = path.to_path_buf();
        if detail.to_lowercase().contains("password") {
            if password.is_some() {
                ProcessingError::WrongPassword { path }
            } else {
                ProcessingError::PasswordRequired { path }
            }
        } else {
            ProcessingError::CorruptPdf { path, detail }
        }
    })
}

fn extract_pages_blocking(
    pdf_path: &Path,
    config: &PdfSourceConfig,
    page_indices: &[usize],
) -> Result<Vec<ExtractedPage>, ProcessingError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, config.password.as_deref())?;
    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let max_px = config.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(config.dpi as f32 / 72.0)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let prep_failed = |idx: usize, detail: String| ProcessingError::PagePreparationFailed {
        page: idx + 1,
        detail,
    };

    let mut out = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        if idx >= total_pages {
            warn!("Skipping page {} (out of range, total={})", idx + 1, total_pages);
            continue;
        }
        let page = pages
            .get(idx as u16)
            .map_err(|e| prep_failed(idx, format!("{:?}", e)))?;

        let screenshot = if config.render_screenshots {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| prep_failed(idx, format!("{:?}", e)))?;
            let encoded = encode_png(&bitmap.as_image(), config.max_rendered_pixels)
                .map_err(|e| prep_failed(idx, format!("Image encoding failed: {}", e)))?;
            Some(encoded)
        } else {
            None
        };

        let text = match config.extract_text.then(|| page.text()) {
            Some(Ok(t)) => Some(t.all()).filter(|t| !t.trim().is_empty()),
            Some(Err(e)) => {
                warn!("Page {}: no text layer ({:?})", idx + 1, e);
                None
            }
            None => None,
        };

        let images = if config.extract_images {
            embedded_images(&page, idx, config.max_image_pixels)
        } else {
            Vec::new()
        };

        debug!(
            "Page {}: {} chars of text, {} embedded image(s), screenshot {}",
            idx + 1,
            text.as_ref().map_or(0, |t| t.len()),
            images.len(),
            screenshot.is_some()
        );

        out.push(ExtractedPage {
            source_index: idx,
            text,
            screenshot,
            images,
        });
    }

    Ok(out)
}

/// Image objects on a page. Unreadable images are skipped, not fatal.
fn embedded_images(page: &PdfPage, idx: usize, max_edge: u32) -> Vec<EmbeddedImage> {
    let mut images = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let raw = match image_object.get_raw_image() {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Page {}: unreadable image object ({:?})", idx + 1, e);
                continue;
            }
        };
        let encoded = match encode_png(&raw, max_edge) {
            Ok(img) => img,
            Err(e) => {
                debug!("Page {}: image encoding failed ({})", idx + 1, e);
                continue;
            }
        };
        let bbox = object
            .bounds()
            .map(|b| (b.left().value, b.bottom().value, b.right().value, b.top().value))
            .unwrap_or_default();
        images.push(EmbeddedImage {
            id: embedded_image_id(idx, images.len()),
            bbox,
            image: encoded,
        });
    }
    images
}

/// Stable, human-readable id: `p<page>-img<n>`, both 1-based.
pub fn embedded_image_id(source_index: usize, ordinal: usize) -> String {
    format!("p{}-img{}", source_index + 1, ordinal + 1)
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, ProcessingError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let metadata = document.metadata();

    let tag = |t: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(t)
            .map(|v| v.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        creation_date: tag(PdfDocumentMetadataTagType::CreationDate),
        modification_date: tag(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Directory in `PDFIUM_LIB_PATH`, if set.
fn pdfium_lib_dir() -> Option<PathBuf> {
    std::env::var_os("PDFIUM_LIB_PATH")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
