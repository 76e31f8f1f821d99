//! Progress-callback trait for per-page translation events.
//!
//! Inject an [`Arc<dyn TranslationProgressCallback>`] via
//! [`crate::config::TranslationConfigBuilder::progress_callback`] to receive
//! events as the document driver works through each page.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least-invasive integration point: callers can forward
//! events to a channel, a terminal progress bar or a GUI status line without
//! the library knowing how the host application communicates. Rate-limit
//! waits are reported too, so a UI can show "cooling down, 42s remaining"
//! instead of looking frozen.
//!
//! # Example
//!
//! ```rust
//! use edgequake_translate::{TranslationConfig, TranslationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl TranslationProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, text_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = TranslationConfig::builder()
//!     .progress_callback(counter as Arc<dyn TranslationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the document driver as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are translated sequentially, but
/// `on_rate_limit_wait` may fire from inside a page's retry loop.
pub trait TranslationProgressCallback: Send + Sync {
    /// Called once before the first page.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page enters the rate gate.
    ///
    /// # Arguments
    /// * `page_num`   : 1-indexed page number
    /// * `total_pages`: total pages in the document
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page is translated.
    ///
    /// # Arguments
    /// * `page_num`   : 1-indexed page number
    /// * `total_pages`: total pages
    /// * `text_len`   : byte length of the translated text
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page ends as a degraded result.
    fn on_page_degraded(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called before sleeping because a provider is cooling down.
    fn on_rate_limit_wait(&self, provider: &str, wait: Duration) {
        let _ = (provider, wait);
    }

    /// Called once after the last page (or after cancellation).
    ///
    /// # Arguments
    /// * `total_pages`     : total pages in the document
    /// * `translated_count`: pages that translated without degradation
    fn on_document_complete(&self, total_pages: usize, translated_count: usize) {
        let _ = (total_pages, translated_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TranslationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranslationConfig`].
pub type ProgressCallback = Arc<dyn TranslationProgressCallback>;
