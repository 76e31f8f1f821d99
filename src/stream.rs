//! Streaming translation API: emit pages as they complete.
//!
//! ## Why stream?
//!
//! Large documents take minutes, and a page stuck in a rate-limit cool-down
//! can take several more. A stream lets callers display partial results
//! immediately or write pages to disk incrementally instead of buffering the
//! whole document.
//!
//! Unlike [`crate::translate::translate_document`], which returns only after
//! every page finishes, [`translate_stream`] yields one [`StreamedPage`] per
//! page. Pages are still translated one at a time and always arrive in page
//! order, because each page is prompted with the headings of the pages
//! before it.

use crate::config::TranslationConfig;
use crate::error::TranslateError;
use crate::orchestrator::TranslationOrchestrator;
use crate::output::{PageTranslationRequest, PageTranslationResult};
use crate::pipeline::input;
use crate::unicode::PageText;
use futures::stream;
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One finished page.
#[derive(Debug, Clone)]
pub struct StreamedPage {
    /// 1-indexed.
    pub page_num: usize,
    pub total_pages: usize,
    pub result: PageTranslationResult,
}

/// A boxed stream of finished pages.
pub type PageStream = Pin<Box<dyn Stream<Item = StreamedPage> + Send>>;

struct StreamState {
    orchestrator: TranslationOrchestrator,
    pages: std::iter::Enumerate<std::vec::IntoIter<PageText>>,
    headers: Vec<String>,
    cancel: CancellationToken,
}

/// Translate `pages`, yielding each one as soon as it is done.
///
/// The stream ends early once `cancel` is raised (checked between pages).
///
/// # Errors
/// Returns `Err(TranslateError)` only when the provider cannot be built.
pub fn translate_stream(
    pages: Vec<PageText>,
    config: &TranslationConfig,
    cancel: CancellationToken,
) -> Result<PageStream, TranslateError> {
    let orchestrator = TranslationOrchestrator::from_config(config)?;
    let total = pages.len();
    let state = StreamState {
        orchestrator,
        pages: pages.into_iter().enumerate(),
        headers: Vec::new(),
        cancel,
    };

    let s = stream::unfold(state, move |mut st| async move {
        if st.cancel.is_cancelled() {
            info!("Stream cancelled");
            return None;
        }
        let (idx, text) = st.pages.next()?;
        let request = PageTranslationRequest::new(text)
            .with_page_info(idx + 1, total)
            .with_previous_headers(st.headers.clone());
        let result = st.orchestrator.translate_page(&request).await;
        st.headers.extend(result.extracted_headers.iter().cloned());
        Some((
            StreamedPage {
                page_num: idx + 1,
                total_pages: total,
                result,
            },
            st,
        ))
    });

    Ok(Box::pin(s))
}

/// Load a local file or URL and stream its translation.
///
/// # Example
/// ```rust,no_run
/// use edgequake_translate::{translate_file_stream, CancellationToken, TranslationConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TranslationConfig::default();
/// let mut pages = translate_file_stream("paper.txt", &config, CancellationToken::new()).await?;
/// while let Some(page) = pages.next().await {
///     println!("page {}: {} chars", page.page_num, page.result.translated_text.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn translate_file_stream(
    input_str: impl AsRef<str>,
    config: &TranslationConfig,
    cancel: CancellationToken,
) -> Result<PageStream, TranslateError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming translation: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pages = input::load_pages(resolved.path()).await?;
    translate_stream(pages, config, cancel)
}
