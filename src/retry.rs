//! Failure classification, backoff and bounded retry.
//!
//! ## Two loops, one policy type
//!
//! Translation retries at two levels. The *call* loop
//! ([`RetryManager::run`]) wraps a single `Provider::translate` and reacts to
//! rate limits and encoding failures. The *page* loop in
//! [`crate::orchestrator`] wraps a whole call loop (under the watchdog) and
//! re-enters the rate gate between attempts. Both advance an explicit
//! [`RetryAttempt`] and share the same backoff shape:
//!
//! ```text
//! wait(n) = clamp(multiplier · 2^(n-1), min_wait, max_wait)
//! ```
//!
//! With the defaults (multiplier 3, floor 10 s, ceiling 180 s) that is
//! 10 s → 10 s → 12 s → 24 s between five attempts.
//!
//! ## What gets retried
//!
//! Everything except [`FailureKind::Fatal`]. Unknown failures land in
//! [`FailureKind::Unclassified`] and are retried like the rest so a page is
//! never dropped silently. Set `fail_fast_on_client_errors` to stop early on
//! 400/401/403/404/422.

use crate::error::{PageError, ProviderError};
use crate::output::{PageInfo, PageTranslationResult};
use crate::progress::ProgressCallback;
use crate::rate_limit::{RateLimiter, DEFAULT_BASE_WAIT_SECS};
use crate::unicode::{self, PageText};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Added to a server-supplied retry-after on HTTP 429.
pub const RATE_LIMIT_MARGIN: Duration = Duration::from_secs(10);

/// Added to a server-supplied retry-after on resource exhaustion.
pub const RESOURCE_EXHAUSTED_MARGIN: Duration = Duration::from_secs(5);

// ── Policy & attempt ─────────────────────────────────────────────────────

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: 3.0,
            min_wait: Duration::from_secs(10),
            max_wait: Duration::from_secs(180),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, multiplier: f64, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier: multiplier.max(0.0),
            min_wait,
            max_wait,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0.0, Duration::ZERO, Duration::ZERO)
    }

    /// Wait after attempt `attempt_number` (1-based) failed.
    pub fn backoff(&self, attempt_number: u32) -> Duration {
        let exp = 2f64.powi(attempt_number.saturating_sub(1).min(62) as i32);
        let secs = self.multiplier * exp;
        bounded_secs(secs, self.max_wait).max(self.min_wait)
    }
}

/// `secs` as a duration in `[0, max]`. Negative or NaN reads as zero,
/// overflow as `max`.
pub(crate) fn bounded_secs(secs: f64, max: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(max).min(max)
}

/// Position inside a retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryAttempt {
    /// 1-based.
    pub number: u32,
    pub max_attempts: u32,
    policy: RetryPolicy,
}

impl RetryAttempt {
    pub fn first(policy: RetryPolicy) -> Self {
        Self {
            number: 1,
            max_attempts: policy.max_attempts.max(1),
            policy,
        }
    }

    pub fn is_last(&self) -> bool {
        self.number >= self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.number)
    }

    /// Wait to insert before the next attempt.
    pub fn backoff(&self) -> Duration {
        self.policy.backoff(self.number)
    }

    /// The following attempt, `None` once the ceiling is reached.
    pub fn next(self) -> Option<Self> {
        if self.is_last() {
            None
        } else {
            Some(Self {
                number: self.number + 1,
                ..self
            })
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// What a caught [`ProviderError`] means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 503 / 504.
    ServerTimeout { status: u16 },
    /// HTTP 429 or a "rate limit" message.
    RateLimited { retry_after: Option<Duration> },
    /// A "resource exhausted" quota message.
    ResourceExhausted { retry_after: Option<Duration> },
    /// A "deadline exceeded" message.
    DeadlineExceeded,
    /// Any other HTTP status.
    HttpStatus { status: u16 },
    Api,
    Transport { timeout: bool },
    Encoding,
    Unclassified,
    /// Configuration problem; retrying cannot help.
    Fatal,
}

impl FailureKind {
    /// Stable snake_case label for logs and [`PageError`].
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::ServerTimeout { .. } => "server_timeout",
            FailureKind::RateLimited { .. } => "rate_limited",
            FailureKind::ResourceExhausted { .. } => "resource_exhausted",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::HttpStatus { .. } => "http_status",
            FailureKind::Api => "api",
            FailureKind::Transport { .. } => "transport",
            FailureKind::Encoding => "encoding",
            FailureKind::Unclassified => "unclassified",
            FailureKind::Fatal => "fatal",
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited { .. } | FailureKind::ResourceExhausted { .. }
        )
    }

    /// Statuses that mean the request itself is wrong.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FailureKind::HttpStatus {
                status: 400 | 401 | 403 | 404 | 422
            }
        )
    }
}

static RE_RATE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate[\s_-]?limit|too many requests|\b429\b").unwrap());
static RE_RESOURCE_EXHAUSTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)resource[\s_-]?exhausted|quota exceeded").unwrap());
static RE_DEADLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)deadline[\s_-]?exceeded|\b504\b").unwrap());

/// Map a provider failure to a [`FailureKind`].
pub fn classify(err: &ProviderError) -> FailureKind {
    match err {
        ProviderError::Validation(_) => FailureKind::Fatal,
        ProviderError::RateLimit { retry_after, .. } => FailureKind::RateLimited {
            retry_after: *retry_after,
        },
        ProviderError::HttpStatus {
            status_code: status @ (503 | 504),
            ..
        } => FailureKind::ServerTimeout { status: *status },
        ProviderError::HttpStatus {
            status_code: 429, ..
        } => FailureKind::RateLimited { retry_after: None },
        // Some vendors report quota as 400/403 with a descriptive body.
        ProviderError::HttpStatus {
            status_code,
            message,
        } => classify_message(message).unwrap_or(FailureKind::HttpStatus {
            status: *status_code,
        }),
        ProviderError::Encoding { .. } => FailureKind::Encoding,
        ProviderError::Transport { timeout, .. } => FailureKind::Transport { timeout: *timeout },
        ProviderError::Api { message } => classify_message(message).unwrap_or(FailureKind::Api),
        ProviderError::Unclassified(message) => {
            classify_message(message).unwrap_or(FailureKind::Unclassified)
        }
    }
}

fn classify_message(message: &str) -> Option<FailureKind> {
    if RE_RESOURCE_EXHAUSTED.is_match(message) {
        Some(FailureKind::ResourceExhausted { retry_after: None })
    } else if RE_RATE_LIMIT.is_match(message) {
        Some(FailureKind::RateLimited { retry_after: None })
    } else if RE_DEADLINE.is_match(message) {
        Some(FailureKind::DeadlineExceeded)
    } else {
        None
    }
}

// ── Manager ──────────────────────────────────────────────────────────────

/// Drives one retry loop and decides what each failure costs.
#[derive(Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
    base_wait_secs: u64,
    fail_fast_on_client_errors: bool,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("policy", &self.policy)
            .field("base_wait_secs", &self.base_wait_secs)
            .field("fail_fast_on_client_errors", &self.fail_fast_on_client_errors)
            .finish()
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            base_wait_secs: DEFAULT_BASE_WAIT_SECS,
            fail_fast_on_client_errors: false,
            progress: None,
        }
    }

    /// Base of the dynamic rate-limit wait when the server gives no hint.
    pub fn with_base_wait_secs(mut self, secs: u64) -> Self {
        self.base_wait_secs = secs;
        self
    }

    pub fn with_fail_fast_on_client_errors(mut self, v: bool) -> Self {
        self.fail_fast_on_client_errors = v;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn should_retry(&self, kind: &FailureKind) -> bool {
        match kind {
            FailureKind::Fatal => false,
            k if k.is_client_error() => !self.fail_fast_on_client_errors,
            _ => true,
        }
    }

    /// Cool-down to record for a rate-limit failure, `None` for other kinds.
    pub fn rate_limit_wait(
        &self,
        kind: &FailureKind,
        provider_id: &str,
        attempt: RetryAttempt,
        limiter: &RateLimiter,
    ) -> Option<Duration> {
        let (retry_after, margin) = match kind {
            FailureKind::RateLimited { retry_after } => (*retry_after, RATE_LIMIT_MARGIN),
            FailureKind::ResourceExhausted { retry_after } => {
                (*retry_after, RESOURCE_EXHAUSTED_MARGIN)
            }
            _ => return None,
        };
        let wait = match retry_after {
            Some(hint) if !hint.is_zero() => (hint + margin).min(limiter.max_wait()),
            _ => limiter.dynamic_wait(provider_id, attempt.number, self.base_wait_secs),
        };
        Some(wait)
    }

    /// Log a failure and apply its side effects.
    ///
    /// Rate-limit kinds mark the provider in `limiter` and, when another
    /// attempt follows, sleep the cool-down before returning.
    pub async fn handle_failure(
        &self,
        provider_id: &str,
        limiter: &RateLimiter,
        kind: &FailureKind,
        err: &ProviderError,
        attempt: RetryAttempt,
    ) {
        let will_retry = !attempt.is_last() && self.should_retry(kind);
        match kind {
            FailureKind::ServerTimeout { status } => warn!(
                provider = provider_id,
                "server timeout ({}) on attempt {}/{}: {}",
                status,
                attempt.number,
                attempt.max_attempts,
                err
            ),
            FailureKind::RateLimited { .. } | FailureKind::ResourceExhausted { .. } => {
                let wait = self
                    .rate_limit_wait(kind, provider_id, attempt, limiter)
                    .unwrap_or_default();
                limiter.mark_hit(provider_id);
                limiter.set_waiting_period(provider_id, wait);
                warn!(
                    provider = provider_id,
                    "{} on attempt {}/{}: cooling down {}s",
                    kind.label(),
                    attempt.number,
                    attempt.max_attempts,
                    wait.as_secs()
                );
                if will_retry {
                    if let Some(ref cb) = self.progress {
                        cb.on_rate_limit_wait(provider_id, wait);
                    }
                    sleep(wait).await;
                }
            }
            FailureKind::DeadlineExceeded => warn!(
                provider = provider_id,
                "deadline exceeded on attempt {}/{}: {}", attempt.number, attempt.max_attempts, err
            ),
            _ => warn!(
                provider = provider_id,
                "{} error on attempt {}/{}: {}",
                kind.label(),
                attempt.number,
                attempt.max_attempts,
                err
            ),
        }
    }

    /// Call `call` until it succeeds, a failure is not retryable, or the
    /// policy is exhausted. Returns the last error in the latter cases.
    ///
    /// An encoding failure first triggers one retry with the prompt
    /// normalized in aggressive mode; that retry does not use up an attempt.
    pub async fn run<F, Fut>(
        &self,
        provider_id: &str,
        limiter: &RateLimiter,
        prompt: &str,
        mut call: F,
    ) -> Result<String, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String, ProviderError>>,
    {
        let mut attempt = RetryAttempt::first(self.policy);
        let mut prompt = prompt.to_string();
        let mut renormalized = false;

        loop {
            let err = match call(prompt.clone()).await {
                Ok(text) => {
                    if attempt.number > 1 {
                        info!(
                            provider = provider_id,
                            "call succeeded on attempt {}/{}", attempt.number, attempt.max_attempts
                        );
                    }
                    return Ok(text);
                }
                Err(e) => e,
            };

            let kind = classify(&err);

            if kind == FailureKind::Encoding && !renormalized {
                renormalized = true;
                let (fixed, modified) = unicode::normalize(&PageText::from(prompt.as_str()), true);
                if modified {
                    warn!(provider = provider_id, "encoding error, retrying with normalized prompt: {}", err);
                    prompt = fixed;
                    continue;
                }
                debug!(provider = provider_id, "normalization left the prompt unchanged");
            }

            self.handle_failure(provider_id, limiter, &kind, &err, attempt)
                .await;

            if !self.should_retry(&kind) {
                return Err(err);
            }
            let Some(next) = attempt.next() else {
                return Err(err);
            };
            sleep(attempt.backoff()).await;
            attempt = next;
        }
    }

    /// Terminal result for a page whose attempts are used up.
    pub fn degraded_result(
        &self,
        page_info: Option<PageInfo>,
        attempts: u32,
        kind: &FailureKind,
        err: &ProviderError,
        source_text: &str,
    ) -> PageTranslationResult {
        let page = page_info.map(|p| p.current).unwrap_or(0);
        let (summary, error) = if self.should_retry(kind) {
            (
                format!(
                    "Translation failed after {} attempts ({}): {}",
                    attempts,
                    kind.label(),
                    err
                ),
                PageError::RetriesExhausted {
                    page,
                    attempts,
                    kind: kind.label().to_string(),
                    detail: err.to_string(),
                },
            )
        } else {
            (
                format!("Translation failed ({}): {}", kind.label(), err),
                PageError::NotRetryable {
                    page,
                    kind: kind.label().to_string(),
                    detail: err.to_string(),
                },
            )
        };

        PageTranslationResult {
            translated_text: degraded_body(&summary, source_text),
            extracted_headers: Vec::new(),
            attempts,
            duration_ms: 0,
            error: Some(error),
        }
    }
}

/// Markdown body shown in place of a page that could not be translated.
pub fn degraded_body(summary: &str, source_text: &str) -> String {
    let mut body = format!("> **Translation error**\n>\n> {}\n", summary);
    if !source_text.trim().is_empty() {
        body.push_str("\n---\n\n**Source text:**\n\n");
        body.push_str(source_text.trim_end());
        body.push('\n');
    }
    body
}
