//! Input resolution: normalise a path, URL or byte buffer to a local PDF file.
//!
//! ## Why download to a temp file?
//!
//! The renderer opens documents by path. Downloading (or spilling an
//! in-memory buffer) into a `TempDir` gives it one, and the directory is
//! removed when [`ResolvedInput`] is dropped. The `%PDF` magic bytes are
//! checked up front so callers get a meaningful error instead of a pdfium
//! failure deep in rendering.

use crate::error::ProcessingError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF available on the local file system.
pub enum ResolvedInput {
    /// The caller's own file.
    Local(PathBuf),
    /// A file written to a temporary directory that lives as long as this value.
    Temporary { path: PathBuf, _dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Whether `input` should be downloaded rather than opened.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ProcessingError> {
    if is_url(input) {
        download(input, timeout_secs).await
    } else {
        open_local(Path::new(input))
    }
}

/// Spill an in-memory PDF to a temporary file.
pub async fn resolve_bytes(bytes: &[u8]) -> Result<ResolvedInput, ProcessingError> {
    let dir = TempDir::new().map_err(|e| ProcessingError::Internal(e.to_string()))?;
    let path = dir.path().join("input.pdf");
    check_magic(&path, bytes)?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ProcessingError::Internal(format!("Failed to write temp file: {}", e)))?;
    Ok(ResolvedInput::Temporary { path, _dir: dir })
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), ProcessingError> {
    if head.len() < PDF_MAGIC.len() || &head[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = head.len().min(4);
        magic[..n].copy_from_slice(&head[..n]);
        return Err(ProcessingError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn open_local(path: &Path) -> Result<ResolvedInput, ProcessingError> {
    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ProcessingError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ProcessingError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut head = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut head)
        .map_err(|e| ProcessingError::CorruptPdf {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    check_magic(path, &head)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path.to_path_buf()))
}

async fn download(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ProcessingError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| ProcessingError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProcessingError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let dir = TempDir::new().map_err(|e| ProcessingError::Internal(e.to_string()))?;
    let path = dir.path().join(file_name_from_url(url));
    check_magic(&path, &bytes)?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ProcessingError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), path.display());
    Ok(ResolvedInput::Temporary { path, _dir: dir })
}

/// Last path segment of `url` when it looks like a file name.
fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
