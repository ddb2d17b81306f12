//! One-call conversion: PDF in, assembled Markdown out.
//!
//! These helpers glue the page source to a [`Processor`] run and wait for
//! the result. Use [`Processor::start_parallel`] / [`Processor::start_serial`]
//! directly when you need the [`ResultHandle`](crate::handle::ResultHandle)
//! to poll or cancel a long run.

use crate::cancel::CancellationSignal;
use crate::config::ProcessingConfig;
use crate::document::{AggregatedDocument, RunMode};
use crate::error::ProcessingError;
use crate::process::Processor;
use crate::progress::SharedProgressSink;
use crate::source::{self, DocumentMetadata, LoadedPages, PdfSourceConfig};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Everything a conversion needs besides the input and the processor.
#[derive(Clone, Default)]
pub struct ConvertOptions {
    pub source: PdfSourceConfig,
    pub processing: ProcessingConfig,
    pub mode: RunMode,
    pub signal: Option<CancellationSignal>,
    pub progress: Option<SharedProgressSink>,
}

impl fmt::Debug for ConvertOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertOptions")
            .field("source", &self.source)
            .field("processing", &self.processing)
            .field("mode", &self.mode)
            .field("signal", &self.signal)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressSink>"))
            .finish()
    }
}

/// Result of [`convert`].
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub document: AggregatedDocument,
    pub metadata: DocumentMetadata,
    /// 1-based PDF page number of each processed page, in page order.
    pub source_page_numbers: Vec<usize>,
}

/// Convert a local PDF or an HTTP(S) URL.
///
/// Returns `Ok` whenever the run finished, even if pages failed or the run
/// was cancelled; inspect `output.document.status`. Errors are input and
/// configuration failures raised before any page is processed.
pub async fn convert(
    input: impl AsRef<str>,
    processor: &Processor,
    options: &ConvertOptions,
) -> Result<ConversionOutput, ProcessingError> {
    let input = input.as_ref();
    options.processing.validate()?;
    info!("Starting {:?} conversion: {}", options.mode, input);
    let loaded = source::load_pages(input, &options.source).await?;
    run_loaded(loaded, processor, options).await
}

/// Convert an in-memory PDF.
pub async fn convert_from_bytes(
    bytes: &[u8],
    processor: &Processor,
    options: &ConvertOptions,
) -> Result<ConversionOutput, ProcessingError> {
    options.processing.validate()?;
    let loaded = source::load_pages_from_bytes(bytes, &options.source).await?;
    run_loaded(loaded, processor, options).await
}

/// Convert and write the Markdown to `output_path`.
///
/// Uses an atomic write (temp file + rename) so readers never observe a
/// partial file.
pub async fn convert_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    processor: &Processor,
    options: &ConvertOptions,
) -> Result<ConversionOutput, ProcessingError> {
    let output = convert(input, processor, options).await?;
    write_atomic(output_path.as_ref(), &output.document.markdown).await?;
    Ok(output)
}

/// Write `contents` to `path` through a sibling temp file.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), ProcessingError> {
    let failed = |source: std::io::Error| ProcessingError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

async fn run_loaded(
    loaded: LoadedPages,
    processor: &Processor,
    options: &ConvertOptions,
) -> Result<ConversionOutput, ProcessingError> {
    let LoadedPages {
        pages,
        source_page_numbers,
        metadata,
    } = loaded;
    let config = options.processing.clone();
    let signal = options.signal.clone();
    let sink = options.progress.clone();

    let document = match options.mode {
        RunMode::Parallel => processor.run_parallel(pages, config, signal, sink).await?,
        RunMode::Serial => processor.run_serial(pages, config, signal, sink).await?,
    };

    Ok(ConversionOutput {
        document,
        metadata,
        source_page_numbers,
    })
}
