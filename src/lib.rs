//! # edgequake-translate
//!
//! Translate extracted document pages with LLM providers, reliably.
//!
//! ## Why this crate?
//!
//! Translating a 200-page paper means 200 calls to a backend that will, at
//! some point, rate-limit you, time out, return an empty candidate, or choke
//! on a lone surrogate copied out of a PDF. This crate wraps the provider
//! call in the machinery that makes a long run finish anyway: per-provider
//! cool-down tracking, two nested retry loops with bounded backoff, a
//! wall-clock watchdog, and Unicode repair before sending. A page that still
//! fails becomes a visible error block in the output instead of aborting the
//! document.
//!
//! It also keeps heading numbering consistent across pages: every page is
//! prompted with the headings found so far, and heading depth is corrected
//! from the numbering (`2.1` → `##`) after translation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text / PDF
//!  │
//!  ├─ 1. Input     split pages on form feeds (pdftotext for PDFs)
//!  ├─ 2. Gate      wait out any provider cool-down
//!  ├─ 3. Sanitize  repair unpaired surrogates, fold math letters
//!  ├─ 4. Compose   rules + previous headings + page text
//!  ├─ 5. Invoke    provider call under retry loops and watchdog
//!  ├─ 6. Polish    fences, invisible chars, heading depth
//!  └─ 7. Output    joined Markdown + per-page results + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_translate::{translate_file, CancellationToken, TranslationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from GEMINI_API_KEY
//!     let config = TranslationConfig::builder()
//!         .provider_name("gemini")
//!         .target_language("ja")
//!         .build()?;
//!     let output = translate_file("paper.txt", &config, &CancellationToken::new()).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{} pages, {} degraded",
//!         output.stats.translated_pages,
//!         output.stats.degraded_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftrans` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-translate = { version = "0.1", default-features = false }
//! ```
//!
//! ## Providers
//!
//! | Name | Default model | Key variable |
//! |------|---------------|--------------|
//! | `gemini` (default) | `gemini-2.5-flash-preview-05-20` | `GEMINI_API_KEY` |
//! | `openai` | `gpt-4.1` | `OPENAI_API_KEY` |
//! | `anthropic` / `claude` | `claude-3-7-sonnet-20250219` | `ANTHROPIC_API_KEY` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod stream;
pub mod translate;
pub mod unicode;

#[cfg(test)]
mod unicode_property_tests;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSeparator, TranslationConfig, TranslationConfigBuilder};
pub use error::{PageError, ProviderError, TranslateError};
pub use orchestrator::TranslationOrchestrator;
pub use output::{
    BatchReport, DocumentOutput, FileReport, PageInfo, PageTranslationRequest,
    PageTranslationResult, TranslationStats,
};
pub use progress::{NoopProgressCallback, ProgressCallback, TranslationProgressCallback};
pub use provider::{create_provider, Provider, ProviderIdentity, ProviderKind, ProviderSettings};
pub use rate_limit::{RateLimitState, RateLimiter};
pub use retry::{FailureKind, RetryAttempt, RetryManager, RetryPolicy};
pub use stream::{translate_file_stream, translate_stream, PageStream, StreamedPage};
pub use translate::{
    translate_directory, translate_document, translate_file, translate_sync, translate_to_file,
};
pub use unicode::PageText;

/// Cooperative cancellation shared between a driver and its caller.
pub use tokio_util::sync::CancellationToken;
