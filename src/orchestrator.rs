//! Per-page translation state machine.
//!
//! ```text
//!            ┌──────────── watchdog deadline (whole page) ────────────┐
//!            │ ┌────────────── outer attempt n ──────────────┐        │
//! request ─▶ │ │ RateGate ─▶ inner retry(Provider)           │ ───────┼─▶ post-process ─▶ Succeeded
//!    │       │ └─────────────────────┬───────────────────────┘        │
//!    │       │                       │ error, attempts and time left: │
//!    │       │                       │ backoff, next n                │
//!    │       └───────────────────────┼────────────────────────────────┘
//!    ▼                               ▼ error, exhausted, fatal or past deadline
//! Sanitize + Compose (once)      DegradedError (error body, no headers)
//! ```
//!
//! The watchdog is one deadline for the page, fixed before the first
//! attempt. No attempt starts and no backoff sleeps past it.
//!
//! ## Why two retry loops?
//!
//! The inner loop reacts to what a single call says (rate limit, encoding).
//! The outer loop survives what a single call cannot see: a watchdog expiry
//! that cuts through a long chain of inner retries, or a provider that keeps
//! failing after its quota cool-down. Both share [`RetryPolicy`] defaults.
//!
//! ## Ownership
//!
//! The orchestrator holds no per-document state. The caller owns the growing
//! header list and feeds it back through
//! [`PageTranslationRequest::previous_headers`].

use crate::config::TranslationConfig;
use crate::error::{ProviderError, TranslateError};
use crate::output::{PageTranslationRequest, PageTranslationResult};
use crate::pipeline::postprocess::{clean_translation, extract_headers};
use crate::prompts::translation_prompt;
use crate::provider::Provider;
use crate::rate_limit::RateLimiter;
use crate::retry::{classify, RetryAttempt, RetryManager, RetryPolicy};
use crate::unicode::{self, PageText};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Translates one page at a time through a provider.
#[derive(Debug, Clone)]
pub struct TranslationOrchestrator {
    provider: Arc<dyn Provider>,
    rate_limiter: Arc<RateLimiter>,
    target_language: String,
    custom_instructions: Option<String>,
    watchdog: Duration,
    page_retry: RetryManager,
    call_retry: RetryManager,
}

impl TranslationOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        rate_limiter: Arc<RateLimiter>,
        config: &TranslationConfig,
    ) -> Self {
        let manager = |policy: RetryPolicy| {
            RetryManager::new(policy)
                .with_base_wait_secs(config.rate_limit_base_wait_secs)
                .with_fail_fast_on_client_errors(config.fail_fast_on_client_errors)
                .with_progress(config.progress_callback.clone())
        };
        Self {
            provider,
            rate_limiter,
            target_language: config.target_language.clone(),
            custom_instructions: config.custom_instructions.clone(),
            watchdog: config.watchdog(),
            page_retry: manager(config.page_retry),
            call_retry: manager(config.call_retry),
        }
    }

    /// Resolve provider and limiter from `config`. The only fallible step.
    pub fn from_config(config: &TranslationConfig) -> Result<Self, TranslateError> {
        let provider = config.resolve_provider()?;
        Ok(Self::new(provider, config.resolve_rate_limiter(), config))
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Translate one page. Never fails: exhaustion yields a degraded result.
    pub async fn translate_page(&self, request: &PageTranslationRequest) -> PageTranslationResult {
        let start = Instant::now();
        let page_label = request
            .page_info
            .map(|p| p.to_string())
            .unwrap_or_else(|| "page".to_string());

        if request.text.is_blank() {
            debug!("{}: blank, nothing to translate", page_label);
            return PageTranslationResult::default();
        }

        let text = sanitize(&request.text);
        let prompt = translation_prompt(
            &text,
            &self.target_language,
            &request.previous_headers,
            self.custom_instructions.as_deref(),
        );

        let provider_id = self.provider.identity().name.clone();
        let mut attempt = RetryAttempt::first(self.page_retry.policy());
        let deadline = start + self.watchdog;

        loop {
            let outcome = if Instant::now() < deadline {
                let gated_call = async {
                    self.rate_limiter
                        .check_and_wait_if_needed(&provider_id)
                        .await;
                    self.call_retry
                        .run(&provider_id, &self.rate_limiter, &prompt, |p| async move {
                            self.provider.translate(&p).await
                        })
                        .await
                };
                timeout_at(deadline, gated_call).await.ok()
            } else {
                None
            };
            let err = match outcome {
                Some(Ok(raw)) => {
                    if self.rate_limiter.status(&provider_id).hit {
                        self.rate_limiter.reset(&provider_id);
                    }
                    let translated_text = clean_translation(&raw);
                    let extracted_headers = extract_headers(&translated_text);
                    info!(
                        provider = %provider_id,
                        "{}: translated on attempt {} ({} heading(s))",
                        page_label,
                        attempt.number,
                        extracted_headers.len()
                    );
                    return PageTranslationResult {
                        translated_text,
                        extracted_headers,
                        attempts: attempt.number,
                        duration_ms: start.elapsed().as_millis() as u64,
                        error: None,
                    };
                }
                Some(Err(e)) => e,
                None => ProviderError::api(format!(
                    "watchdog expired after {}s",
                    self.watchdog.as_secs()
                )),
            };

            let kind = classify(&err);
            let wait = attempt.backoff();
            let next = if self.page_retry.should_retry(&kind) {
                attempt.next()
            } else {
                None
            };
            let next = next.filter(|_| {
                let fits = Instant::now() + wait < deadline;
                if !fits {
                    debug!("{}: watchdog deadline leaves no room for another attempt", page_label);
                }
                fits
            });
            let Some(next) = next else {
                warn!(
                    provider = %provider_id,
                    "{}: giving up after {} attempt(s): {}",
                    page_label,
                    attempt.number,
                    err
                );
                let mut result = self.page_retry.degraded_result(
                    request.page_info,
                    attempt.number,
                    &kind,
                    &err,
                    &request.text.to_string_lossy(),
                );
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            };

            warn!(
                provider = %provider_id,
                "{}: attempt {}/{} failed ({}), retrying in {}s",
                page_label,
                attempt.number,
                attempt.max_attempts,
                kind.label(),
                wait.as_secs()
            );
            sleep(wait).await;
            attempt = next;
        }
    }
}

/// Validate, then repair conservatively, then aggressively if still unsafe.
fn sanitize(text: &PageText) -> String {
    sanitize_with(text, |t, aggressive| PageText::from(unicode::normalize(t, aggressive).0))
}

/// Escalating repair over any `repair(text, aggressive)` function.
///
/// The aggressive result is decoded lossily, so the returned prompt text is
/// strict UTF-8 whatever `repair` produced.
fn sanitize_with(text: &PageText, repair: impl Fn(&PageText, bool) -> PageText) -> String {
    let issue = match unicode::validate(text) {
        Ok(()) => return text.to_string_lossy(),
        Err(issue) => issue,
    };
    debug!("unsafe page text: {}", issue);

    let conservative = repair(text, false);
    if unicode::validate(&conservative).is_ok() {
        return conservative.to_string_lossy();
    }
    warn!("conservative repair left unsafe text, stripping instead");
    repair(text, true).to_string_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::provider::{ProviderIdentity, RateLimitHints};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug)]
    struct Scripted {
        identity: ProviderIdentity,
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                identity: ProviderIdentity {
                    name: "stub".into(),
                    model: "stub-1".into(),
                    timeout: Duration::from_secs(5),
                },
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn identity(&self) -> &ProviderIdentity {
            &self.identity
        }
        fn default_model(&self) -> &'static str {
            "stub-1"
        }
        async fn translate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Unclassified("script exhausted".into())))
        }
        async fn validate_credential(&self) -> bool {
            true
        }
        fn rate_limit_hints(&self) -> RateLimitHints {
            RateLimitHints {
                requests_per_minute: 1,
                tokens_per_minute: 1,
                requests_per_day: 1,
            }
        }
    }

    fn fast_config() -> TranslationConfig {
        TranslationConfig::builder()
            .page_retry(RetryPolicy::immediate(2))
            .call_retry(RetryPolicy::immediate(2))
            .build()
            .unwrap()
    }

    fn orchestrator(p: Arc<Scripted>, config: &TranslationConfig) -> TranslationOrchestrator {
        TranslationOrchestrator::new(p, Arc::new(RateLimiter::new()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn blank_page_skips_provider() {
        let p = Scripted::new(vec![]);
        let o = orchestrator(Arc::clone(&p), &fast_config());
        let r = o.translate_page(&PageTranslationRequest::new(" \n\t")).await;
        assert!(r.translated_text.is_empty());
        assert!(!r.is_degraded());
        assert_eq!(p.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_corrects_headings_and_extracts() {
        let p = Scripted::new(vec![Ok("# 1 序論\n本文\n# 1.1 範囲".into())]);
        let o = orchestrator(Arc::clone(&p), &fast_config());
        let req = PageTranslationRequest::new("1 Intro\n1.1 Scope")
            .with_page_info(1, 3)
            .with_previous_headers(vec!["# 0 Preface".into()]);
        let r = o.translate_page(&req).await;
        assert_eq!(r.extracted_headers, vec!["# 1 序論", "## 1.1 範囲"]);
        assert_eq!(r.attempts, 1);
        assert!(p.prompts.lock()[0].contains("# 0 Preface"));
        assert_eq!(req.previous_headers, vec!["# 0 Preface".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_degraded_result() {
        let p = Scripted::new(vec![]);
        let o = orchestrator(Arc::clone(&p), &fast_config());
        let r = o
            .translate_page(&PageTranslationRequest::new("2 Method").with_page_info(2, 2))
            .await;
        assert!(r.is_degraded());
        assert!(!r.translated_text.is_empty());
        assert!(r.extracted_headers.is_empty());
        assert_eq!(r.attempts, 2);
        // 2 outer × 2 inner
        assert_eq!(p.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let p = Scripted::new(vec![Err(ProviderError::Validation("bad key".into()))]);
        let o = orchestrator(Arc::clone(&p), &fast_config());
        let r = o.translate_page(&PageTranslationRequest::new("text")).await;
        assert!(r.is_degraded());
        assert_eq!(p.calls(), 1);
        assert!(r.translated_text.contains("fatal"));
    }

    #[tokio::test(start_paused = true)]
    async fn unsafe_text_is_sanitised_before_sending() {
        let p = Scripted::new(vec![Ok("ok".into())]);
        let o = orchestrator(Arc::clone(&p), &fast_config());
        let text = PageText::from_utf16(vec![0x61, 0xD800, 0x62]);
        let r = o.translate_page(&PageTranslationRequest::new(text)).await;
        assert!(!r.is_degraded());
        let prompt = p.prompts.lock()[0].clone();
        assert!(prompt.ends_with("a?b"));
    }

    #[test]
    fn sanitize_escalates_when_conservative_repair_is_not_enough() {
        let unsafe_text = PageText::from_utf16(vec![0x61, 0xDC00, 0x62]);
        let modes = Mutex::new(Vec::new());
        let out = sanitize_with(&unsafe_text, |t, aggressive| {
            modes.lock().push(aggressive);
            if aggressive {
                PageText::from("ab")
            } else {
                t.clone()
            }
        });
        assert_eq!(out, "ab");
        assert_eq!(*modes.lock(), vec![false, true]);
    }

    #[test]
    fn sanitize_falls_back_to_lossy_decoding() {
        let unsafe_text = PageText::from_utf16(vec![0x61, 0xD800]);
        let out = sanitize_with(&unsafe_text, |t, _| t.clone());
        assert_eq!(out, "a\u{FFFD}");
    }

    #[test]
    fn sanitize_leaves_valid_text_alone() {
        let out = sanitize_with(&PageText::from("fine"), |_, _| unreachable!());
        assert_eq!(out, "fine");
        assert_eq!(sanitize(&PageText::from_utf16(vec![0x61, 0xD800, 0x62])), "a?b");
    }

    #[derive(Debug)]
    struct Stalling(ProviderIdentity);

    #[async_trait]
    impl Provider for Stalling {
        fn identity(&self) -> &ProviderIdentity {
            &self.0
        }
        fn default_model(&self) -> &'static str {
            "slow"
        }
        async fn translate(&self, _prompt: &str) -> Result<String, ProviderError> {
            sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
        async fn validate_credential(&self) -> bool {
            true
        }
        fn rate_limit_hints(&self) -> RateLimitHints {
            RateLimitHints {
                requests_per_minute: 1,
                tokens_per_minute: 1,
                requests_per_day: 1,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_expiry_folds_into_retry_path() {
        let config = TranslationConfig::builder()
            .watchdog_secs(5)
            .page_retry(RetryPolicy::immediate(2))
            .build()
            .unwrap();
        let provider = Arc::new(Stalling(ProviderIdentity {
            name: "slow".into(),
            model: "slow".into(),
            timeout: Duration::from_secs(1),
        }));
        let o = TranslationOrchestrator::new(provider, Arc::new(RateLimiter::new()), &config);
        let start = Instant::now();
        let r = o.translate_page(&PageTranslationRequest::new("x")).await;
        assert!(r.is_degraded());
        assert!(r.translated_text.contains("watchdog"));
        assert!(start.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_bounds_the_whole_page_with_default_policies() {
        let config = TranslationConfig::default();
        let provider = Arc::new(Stalling(ProviderIdentity {
            name: "slow".into(),
            model: "slow".into(),
            timeout: Duration::from_secs(1),
        }));
        let o = TranslationOrchestrator::new(provider, Arc::new(RateLimiter::new()), &config);
        let start = Instant::now();
        let r = o.translate_page(&PageTranslationRequest::new("x")).await;
        assert!(r.is_degraded());
        assert!(r.translated_text.contains("watchdog"));
        assert_eq!(r.attempts, 1);
        assert!(start.elapsed() <= config.watchdog());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_when_backoff_would_cross_the_deadline() {
        // Each failing call is instant, but the backoff floor is 10 s.
        let config = TranslationConfig::builder()
            .watchdog_secs(25)
            .call_retry(RetryPolicy::immediate(1))
            .build()
            .unwrap();
        let p = Scripted::new(vec![]);
        let o = orchestrator(Arc::clone(&p), &config);
        let start = Instant::now();
        let r = o.translate_page(&PageTranslationRequest::new("x")).await;
        assert!(r.is_degraded());
        assert!(start.elapsed() <= Duration::from_secs(25));
        // Attempts at 0 s, 10 s and 20 s; a fourth would start at 30 s.
        assert_eq!(p.calls(), 3);
        assert_eq!(r.attempts, 3);
    }
}
