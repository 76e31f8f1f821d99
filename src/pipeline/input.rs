//! Input resolution and page loading.
//!
//! ## Where do pages come from?
//!
//! Pages arrive as extracted text, one page per form feed (`\x0c`), which is
//! what `pdftotext` emits. Plain-text inputs are read as-is; a PDF (`%PDF`
//! magic) is run through `pdftotext` first. The bytes are decoded as WTF-8 so
//! that lone surrogates produced by some extractors survive as
//! [`PageText`] code units and can be repaired by [`crate::unicode`] instead
//! of being lost at load time.
//!
//! ## Why download to a temp file?
//!
//! `pdftotext` needs a file-system path. A URL input is downloaded into a
//! `TempDir` that lives as long as the [`ResolvedInput`], so cleanup happens
//! automatically when processing completes.

use crate::error::TranslateError;
use crate::unicode::PageText;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Page separator emitted by `pdftotext`.
pub const PAGE_BREAK: u8 = 0x0c;

/// Extensions picked up by [`list_input_files`].
pub const INPUT_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL, downloaded to a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a readable local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, TranslateError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).map(ResolvedInput::Local)
    }
}

fn resolve_local(path: &Path) -> Result<PathBuf, TranslateError> {
    let path = path.to_path_buf();
    if !path.is_file() {
        return Err(TranslateError::FileNotFound { path });
    }
    match std::fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(TranslateError::PermissionDenied { path })
        }
        Err(source) => Err(TranslateError::ReadFailed { path, source }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, TranslateError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TranslateError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TranslateError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let temp_dir = TempDir::new().map_err(|e| TranslateError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url, &bytes));
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| TranslateError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment with an extension, else a name from the magic bytes.
fn filename_from_url(url: &str, bytes: &[u8]) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    if is_pdf(bytes) {
        "downloaded.pdf".to_string()
    } else {
        "downloaded.txt".to_string()
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Split extracted text into pages on form feeds.
///
/// A trailing empty segment (the final `\x0c` pdftotext writes) is dropped;
/// empty pages elsewhere are kept so page numbers stay aligned.
pub fn split_pages(bytes: &[u8]) -> Vec<PageText> {
    let mut pages: Vec<PageText> = bytes
        .split(|b| *b == PAGE_BREAK)
        .map(PageText::from_wtf8_lossy)
        .collect();
    if pages.len() > 1 && pages.last().is_some_and(PageText::is_empty) {
        pages.pop();
    }
    pages
}

/// Load the pages of a local text or PDF file.
pub async fn load_pages(path: &Path) -> Result<Vec<PageText>, TranslateError> {
    let path = resolve_local(path)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| TranslateError::ReadFailed {
            path: path.clone(),
            source,
        })?;

    let text = if is_pdf(&bytes) {
        extract_pdf_text(&path).await?
    } else {
        bytes
    };

    let pages = split_pages(&text);
    debug!("Loaded {} page(s) from {}", pages.len(), path.display());
    Ok(pages)
}

/// Run `pdftotext -enc UTF-8 <path> -` and return its stdout.
async fn extract_pdf_text(path: &Path) -> Result<Vec<u8>, TranslateError> {
    let output = tokio::process::Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| TranslateError::ExtractionFailed {
            path: path.to_path_buf(),
            detail: if e.kind() == std::io::ErrorKind::NotFound {
                "pdftotext not found on PATH".to_string()
            } else {
                e.to_string()
            },
        })?;

    if !output.status.success() {
        return Err(TranslateError::ExtractionFailed {
            path: path.to_path_buf(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Translatable files directly inside `dir`, sorted by name.
pub fn list_input_files(dir: &Path) -> Result<Vec<PathBuf>, TranslateError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TranslateError::ReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_input_extension(p))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(TranslateError::NoInputFiles {
            path: dir.to_path_buf(),
        });
    }
    Ok(files)
}

fn has_input_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| INPUT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `<dir>/<stem>_<lang>.md`, with `dir` defaulting to the input's parent.
pub fn default_output_path(input: &Path, output_dir: Option<&Path>, target_language: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}_{}.md", stem, target_language))
}
