//! Request and result types for page and document translation.

use crate::error::PageError;
use crate::unicode::PageText;
use serde::{Deserialize, Serialize};

/// Position of a page in its document. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-indexed page number.
    pub current: usize,
    pub total: usize,
}

impl std::fmt::Display for PageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}/{}", self.current, self.total)
    }
}

/// One page to translate.
#[derive(Debug, Clone, Default)]
pub struct PageTranslationRequest {
    pub text: PageText,
    pub page_info: Option<PageInfo>,
    /// Headings seen on earlier pages, in order. Prompt context only.
    pub previous_headers: Vec<String>,
}

impl PageTranslationRequest {
    pub fn new(text: impl Into<PageText>) -> Self {
        Self {
            text: text.into(),
            page_info: None,
            previous_headers: Vec::new(),
        }
    }

    pub fn with_page_info(mut self, current: usize, total: usize) -> Self {
        self.page_info = Some(PageInfo { current, total });
        self
    }

    pub fn with_previous_headers(mut self, headers: Vec<String>) -> Self {
        self.previous_headers = headers;
        self
    }

    /// 1-indexed page number, or 0 when unknown.
    pub fn page_num(&self) -> usize {
        self.page_info.map(|p| p.current).unwrap_or(0)
    }
}

/// Outcome of translating one page.
///
/// A degraded page still carries a non-empty `translated_text` (the error
/// body) and an empty `extracted_headers`; check [`Self::is_degraded`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageTranslationResult {
    pub translated_text: String,
    /// Heading lines of `translated_text`, in order.
    pub extracted_headers: Vec<String>,
    /// Page-level attempts used (0 when no provider call was needed).
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<PageError>,
}

impl PageTranslationResult {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate statistics for a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationStats {
    pub total_pages: usize,
    pub translated_pages: usize,
    pub degraded_pages: usize,
    /// Pages never attempted because the run was cancelled.
    pub skipped_pages: usize,
    pub total_attempts: u32,
    pub total_duration_ms: u64,
    pub cancelled: bool,
}

/// Full output of a document translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// All page texts joined with the configured separator.
    pub markdown: String,
    pub pages: Vec<PageTranslationResult>,
    /// Every heading collected across the document, in order.
    pub headers: Vec<String>,
    pub stats: TranslationStats,
}

/// Result of processing one file in a directory batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub input: std::path::PathBuf,
    pub output: std::path::PathBuf,
    pub skipped: bool,
    pub stats: Option<TranslationStats>,
    pub error: Option<String>,
}

/// Summary of a directory batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| !f.skipped && f.error.is_none())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().filter(|f| f.skipped).count()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}
