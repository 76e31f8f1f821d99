//! Eager (full-document) translation entry points.
//!
//! ## Why sequential?
//!
//! Heading continuity depends on every earlier page's output: page *n* is
//! prompted with the headings pages 1..n produced. Pages of one document
//! therefore run strictly one after another. Use
//! [`crate::stream::translate_stream`] to receive pages as they finish
//! instead of waiting for the whole document.
//!
//! ## Cancellation
//!
//! A [`CancellationToken`] is checked between pages, never inside a page. Pages not
//! started when it is raised are counted as skipped and the partial document
//! is still returned.

use crate::config::TranslationConfig;
use crate::error::TranslateError;
use crate::orchestrator::TranslationOrchestrator;
use crate::output::{
    BatchReport, DocumentOutput, FileReport, PageTranslationRequest, PageTranslationResult,
    TranslationStats,
};
use crate::pipeline::input;
use crate::unicode::PageText;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Translate already-extracted pages.
///
/// # Errors
/// Returns `Err(TranslateError)` only when the provider cannot be built.
/// Pages that fail are returned as degraded results, never as errors.
pub async fn translate_document(
    pages: &[PageText],
    config: &TranslationConfig,
    cancel: &CancellationToken,
) -> Result<DocumentOutput, TranslateError> {
    let orchestrator = TranslationOrchestrator::from_config(config)?;
    Ok(translate_pages(&orchestrator, pages, config, cancel).await)
}

/// Sequential page loop with header accumulation, progress and statistics.
pub async fn translate_pages(
    orchestrator: &TranslationOrchestrator,
    pages: &[PageText],
    config: &TranslationConfig,
    cancel: &CancellationToken,
) -> DocumentOutput {
    let start = Instant::now();
    let total = pages.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_document_start(total);
    }

    let mut headers: Vec<String> = Vec::new();
    let mut results: Vec<PageTranslationResult> = Vec::with_capacity(total);
    let mut cancelled = false;

    for (idx, text) in pages.iter().enumerate() {
        let page_num = idx + 1;
        if cancel.is_cancelled() {
            info!("Cancelled before page {}/{}", page_num, total);
            cancelled = true;
            break;
        }
        if let Some(cb) = cb {
            cb.on_page_start(page_num, total);
        }

        let request = PageTranslationRequest::new(text.clone())
            .with_page_info(page_num, total)
            .with_previous_headers(headers.clone());
        let result = orchestrator.translate_page(&request).await;

        if let Some(cb) = cb {
            match &result.error {
                None => cb.on_page_complete(page_num, total, result.translated_text.len()),
                Some(e) => cb.on_page_degraded(page_num, total, &e.to_string()),
            }
        }
        headers.extend(result.extracted_headers.iter().cloned());
        results.push(result);
    }

    let degraded = results.iter().filter(|r| r.is_degraded()).count();
    let stats = TranslationStats {
        total_pages: total,
        translated_pages: results.len() - degraded,
        degraded_pages: degraded,
        skipped_pages: total - results.len(),
        total_attempts: results.iter().map(|r| r.attempts).sum(),
        total_duration_ms: start.elapsed().as_millis() as u64,
        cancelled,
    };

    info!(
        "Translation complete: {}/{} pages, {} degraded, {}ms total",
        stats.translated_pages, total, degraded, stats.total_duration_ms
    );
    if let Some(cb) = cb {
        cb.on_document_complete(total, stats.translated_pages);
    }

    DocumentOutput {
        markdown: assemble_document(&results, config),
        pages: results,
        headers,
        stats,
    }
}

/// Translate a local file or URL.
pub async fn translate_file(
    input_str: impl AsRef<str>,
    config: &TranslationConfig,
    cancel: &CancellationToken,
) -> Result<DocumentOutput, TranslateError> {
    let input_str = input_str.as_ref();
    info!("Starting translation: {}", input_str);

    let orchestrator = TranslationOrchestrator::from_config(config)?;
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pages = input::load_pages(resolved.path()).await?;
    info!("{} has {} page(s)", input_str, pages.len());

    Ok(translate_pages(&orchestrator, &pages, config, cancel).await)
}

/// Translate a file and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn translate_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &TranslationConfig,
    cancel: &CancellationToken,
) -> Result<TranslationStats, TranslateError> {
    let output = translate_file(input_str, config, cancel).await?;
    write_atomic(output_path.as_ref(), &output.markdown)?;
    Ok(output.stats)
}

/// Translate every `.txt` / `.pdf` file in `input_dir`.
///
/// Outputs go to `<output_dir>/<stem>_<lang>.md` (default: next to the
/// input). Existing outputs are skipped unless `force_overwrite` is set. The
/// provider and rate limiter are shared by every file, so a quota hit on one
/// file makes the next one wait. A file that fails to load is reported and
/// the batch moves on.
pub async fn translate_directory(
    input_dir: impl AsRef<Path>,
    output_dir: Option<&Path>,
    config: &TranslationConfig,
    cancel: &CancellationToken,
) -> Result<BatchReport, TranslateError> {
    let files = input::list_input_files(input_dir.as_ref())?;

    let mut shared = config.clone();
    shared.provider = Some(config.resolve_provider()?);
    shared.rate_limiter = Some(config.resolve_rate_limiter());

    let mut report = BatchReport::default();
    for file in files {
        if cancel.is_cancelled() {
            info!("Cancelled; {} file(s) left untouched", report.files.len());
            break;
        }
        let output = input::default_output_path(&file, output_dir, &config.target_language);
        if output.exists() && !config.force_overwrite {
            info!("Skipping {} (output exists)", file.display());
            report.files.push(FileReport {
                input: file,
                output,
                skipped: true,
                stats: None,
                error: None,
            });
            continue;
        }

        let entry = match translate_to_file(path_str(&file), &output, &shared, cancel).await {
            Ok(stats) => FileReport {
                input: file,
                output,
                skipped: false,
                stats: Some(stats),
                error: None,
            },
            Err(e) => {
                warn!("Failed to translate {}: {}", file.display(), e);
                FileReport {
                    input: file,
                    output,
                    skipped: false,
                    stats: None,
                    error: Some(e.to_string()),
                }
            }
        };
        report.files.push(entry);
    }
    Ok(report)
}

/// Synchronous wrapper around [`translate_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn translate_sync(
    input_str: impl AsRef<str>,
    config: &TranslationConfig,
) -> Result<DocumentOutput, TranslateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranslateError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(translate_file(input_str, config, &CancellationToken::new()))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Join non-empty page texts with the configured separator.
fn assemble_document(pages: &[PageTranslationResult], config: &TranslationConfig) -> String {
    let mut out = String::new();
    for (idx, page) in pages.iter().enumerate() {
        if page.translated_text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(&config.page_separator.render(idx + 1));
        }
        out.push_str(page.translated_text.trim_end());
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), TranslateError> {
    let write_err = |source: std::io::Error| TranslateError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;

    fn page(text: &str) -> PageTranslationResult {
        PageTranslationResult {
            translated_text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn assemble_skips_blank_pages() {
        let config = TranslationConfig::default();
        let md = assemble_document(&[page("# 1 A\n"), page(""), page("B")], &config);
        assert_eq!(md, "# 1 A\n\n---\n\nB\n");
    }

    #[test]
    fn assemble_with_comment_separator() {
        let config = TranslationConfig::builder()
            .page_separator(PageSeparator::Comment)
            .build()
            .unwrap();
        let md = assemble_document(&[page("A"), page("B")], &config);
        assert_eq!(md, "A\n\n<!-- page 2 -->\n\nB\n");
    }

    #[test]
    fn assemble_empty_document() {
        assert_eq!(assemble_document(&[], &TranslationConfig::default()), "");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.md");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        write_atomic(&path, "again").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "again");
    }
}
