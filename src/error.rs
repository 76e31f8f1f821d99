//! Error types for the edgequake-translate library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`TranslateError`] is **fatal**: translation cannot start at all (unknown
//!   provider, missing API key, unreadable input). Returned as
//!   `Err(TranslateError)` from the top-level `translate*` functions and from
//!   [`crate::orchestrator::TranslationOrchestrator::from_config`].
//!
//! * [`ProviderError`] is the failure taxonomy of a single backend call. The
//!   retry layer classifies these into [`crate::retry::FailureKind`] and
//!   decides whether to try again.
//!
//! * [`PageError`] is **non-fatal**: one page exhausted its retries. Stored
//!   inside [`crate::output::PageTranslationResult`] next to the degraded
//!   error body so one bad page never aborts a whole document.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the edgequake-translate library.
#[derive(Debug, Error)]
pub enum TranslateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the input failed for another reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input is a PDF but its text could not be extracted.
    #[error("Text extraction failed for '{path}': {detail}\nInstall poppler-utils (pdftotext) or pass a .txt file.")]
    ExtractionFailed { path: PathBuf, detail: String },

    /// Downloading a URL input failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Downloading a URL input took longer than the request timeout.
    #[error("Download timed out after {secs}s: '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// A directory was given but it contains no translatable files.
    #[error("No input files found in '{path}'")]
    NoInputFiles { path: PathBuf },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider could not be constructed (unknown name,
    /// missing or empty API key).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single provider call.
///
/// `HttpStatus` is the API failure that carries a transport status;
/// `Unclassified` is the explicit bucket for anything the other kinds do
/// not describe, so the retry layer can still act on it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Bad configuration: missing credential, unknown provider identity.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic backend failure, including malformed responses.
    #[error("API error: {message}")]
    Api { message: String },

    /// Backend failure with an HTTP status.
    #[error("HTTP {status_code}: {message}")]
    HttpStatus { status_code: u16, message: String },

    /// The backend signalled quota exhaustion.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The prompt could not be encoded for transmission.
    #[error("Text encoding error: {message}")]
    Encoding { message: String },

    /// Connection failure or transport-level timeout.
    #[error("Transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// Anything else.
    #[error("Unclassified error: {0}")]
    Unclassified(String),
}

impl ProviderError {
    /// Shorthand for [`ProviderError::Api`].
    pub fn api(message: impl Into<String>) -> Self {
        ProviderError::Api {
            message: message.into(),
        }
    }

    /// Status code when the error came with one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::HttpStatus { status_code, .. } => Some(*status_code),
            ProviderError::RateLimit { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Transport {
                message: e.to_string(),
                timeout: true,
            }
        } else if e.is_connect() || e.is_request() {
            ProviderError::Transport {
                message: e.to_string(),
                timeout: false,
            }
        } else if e.is_decode() {
            ProviderError::api(format!("could not decode response body: {e}"))
        } else if let Some(status) = e.status() {
            ProviderError::HttpStatus {
                status_code: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Unclassified(e.to_string())
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside the degraded body in
/// [`crate::output::PageTranslationResult`]. The document continues with
/// the next page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Every attempt failed.
    #[error("Page {page}: translation failed after {attempts} attempts ({kind}): {detail}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        kind: String,
        detail: String,
    },

    /// The error could not be retried at all.
    #[error("Page {page}: translation failed ({kind}): {detail}")]
    NotRetryable {
        page: usize,
        kind: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_not_configured_display() {
        let e = TranslateError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "Set GEMINI_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("gemini"), "got: {msg}");
        assert!(msg.contains("GEMINI_API_KEY"));
    }

    #[test]
    fn http_status_display_and_code() {
        let e = ProviderError::HttpStatus {
            status_code: 503,
            message: "overloaded".into(),
        };
        assert_eq!(e.to_string(), "HTTP 503: overloaded");
        assert_eq!(e.status_code(), Some(503));
    }

    #[test]
    fn rate_limit_reports_429() {
        let e = ProviderError::RateLimit {
            message: "quota".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(e.status_code(), Some(429));
        assert!(e.to_string().contains("quota"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::RetriesExhausted {
            page: 4,
            attempts: 5,
            kind: "server_timeout".into(),
            detail: "HTTP 504".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("RetriesExhausted"));
        assert!(e.to_string().contains("after 5 attempts"));
    }
}
