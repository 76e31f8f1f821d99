//! Configuration types for page translation.
//!
//! All translation behaviour is controlled through [`TranslationConfig`],
//! built via its [`TranslationConfigBuilder`]. Keeping every knob in one
//! struct makes it trivial to share configs across documents, log them, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::{ProviderError, TranslateError};
use crate::progress::ProgressCallback;
use crate::provider::{self, Provider, ProviderKind, ProviderSettings};
use crate::rate_limit::{RateLimiter, DEFAULT_BASE_WAIT_SECS};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for translating a document.
///
/// Built via [`TranslationConfig::builder()`] or using
/// [`TranslationConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_translate::TranslationConfig;
///
/// let config = TranslationConfig::builder()
///     .provider_name("openai")
///     .target_language("fr")
///     .page_max_attempts(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranslationConfig {
    /// Provider name: `gemini`, `openai`, `anthropic` or `claude`. Default: `gemini`.
    pub provider_name: String,

    /// Model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// API key. If None, read from the provider's environment variable.
    pub api_key: Option<String>,

    /// Endpoint override for proxies and tests.
    pub base_url: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn Provider>>,

    /// Shared cool-down tracker. If None, each document gets its own.
    ///
    /// Share one limiter across documents so a quota hit while translating
    /// one file makes the next file wait instead of hitting it again.
    pub rate_limiter: Option<Arc<RateLimiter>>,

    /// Target language, as an ISO 639-1 code or a language name. Default: `ja`.
    pub target_language: String,

    /// Extra instructions appended to every prompt.
    pub custom_instructions: Option<String>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Translation should be faithful, not creative.
    pub temperature: f32,

    /// Output-token ceiling. If None, uses the provider default.
    pub max_output_tokens: Option<u32>,

    /// Per-HTTP-request timeout in seconds. Default: 500.
    pub request_timeout_secs: u64,

    /// Wall-clock ceiling for one page attempt, including inner retries and
    /// their backoff. Default: 500.
    pub watchdog_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Page-level retry loop. Default: 5 attempts, ×3, 10 s–180 s.
    pub page_retry: RetryPolicy,

    /// Retry loop around each provider call. Default: 5 attempts, ×3, 10 s–180 s.
    pub call_retry: RetryPolicy,

    /// Base of the dynamic rate-limit wait in seconds. Default: 60.
    pub rate_limit_base_wait_secs: u64,

    /// Stop retrying on 400/401/403/404/422. Default: false.
    pub fail_fast_on_client_errors: bool,

    /// Page separator in assembled output. Default: horizontal rule.
    pub page_separator: PageSeparator,

    /// Overwrite existing outputs in directory runs. Default: false.
    pub force_overwrite: bool,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider_name: ProviderKind::Gemini.as_str().to_string(),
            model: None,
            api_key: None,
            base_url: None,
            provider: None,
            rate_limiter: None,
            target_language: "ja".to_string(),
            custom_instructions: None,
            temperature: 0.0,
            max_output_tokens: None,
            request_timeout_secs: 500,
            watchdog_secs: 500,
            download_timeout_secs: 120,
            page_retry: RetryPolicy::default(),
            call_retry: RetryPolicy::default(),
            rate_limit_base_wait_secs: DEFAULT_BASE_WAIT_SECS,
            fail_fast_on_client_errors: false,
            page_separator: PageSeparator::default(),
            force_overwrite: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("provider", &self.provider.as_ref().map(|p| &p.identity().name))
            .field("target_language", &self.target_language)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("watchdog_secs", &self.watchdog_secs)
            .field("page_retry", &self.page_retry)
            .field("call_retry", &self.call_retry)
            .field("fail_fast_on_client_errors", &self.fail_fast_on_client_errors)
            .field("page_separator", &self.page_separator)
            .field("force_overwrite", &self.force_overwrite)
            .finish()
    }
}

impl TranslationConfig {
    /// Create a new builder for `TranslationConfig`.
    pub fn builder() -> TranslationConfigBuilder {
        TranslationConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    /// Provider settings with the API key resolved from config or environment.
    pub fn provider_settings(&self, kind: ProviderKind) -> ProviderSettings {
        ProviderSettings {
            api_key: self
                .api_key
                .clone()
                .or_else(|| provider::api_key_from_env(kind))
                .unwrap_or_default(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            base_url: self.base_url.clone(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }

    /// The configured provider, or one built from `provider_name`.
    pub fn resolve_provider(&self) -> Result<Arc<dyn Provider>, TranslateError> {
        if let Some(ref p) = self.provider {
            return Ok(Arc::clone(p));
        }
        let not_configured = |e: ProviderError, hint: String| TranslateError::ProviderNotConfigured {
            provider: self.provider_name.clone(),
            hint: format!("{}\n{}", e, hint),
        };
        let kind: ProviderKind = self.provider_name.parse().map_err(|e| {
            not_configured(e, "Choose one of: gemini, openai, anthropic, claude".into())
        })?;
        provider::create_provider(&self.provider_name, self.provider_settings(kind)).map_err(|e| {
            not_configured(
                e,
                format!("Set {} or pass --api-key.", kind.env_var()),
            )
        })
    }

    /// The shared limiter, or a fresh one.
    pub fn resolve_rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter
            .clone()
            .unwrap_or_else(|| Arc::new(RateLimiter::new()))
    }
}

/// Builder for [`TranslationConfig`].
pub struct TranslationConfigBuilder {
    config: TranslationConfig,
}

impl fmt::Debug for TranslationConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl TranslationConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = provider::normalize_name(&name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.config.rate_limiter = Some(limiter);
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.config.target_language = lang.into().trim().to_string();
        self
    }

    pub fn custom_instructions(mut self, text: impl Into<String>) -> Self {
        self.config.custom_instructions = Some(text.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = Some(n.max(1));
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn watchdog_secs(mut self, secs: u64) -> Self {
        self.config.watchdog_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn page_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.page_retry = policy;
        self
    }

    pub fn call_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.call_retry = policy;
        self
    }

    pub fn page_max_attempts(mut self, n: u32) -> Self {
        self.config.page_retry.max_attempts = n.max(1);
        self
    }

    pub fn call_max_attempts(mut self, n: u32) -> Self {
        self.config.call_retry.max_attempts = n.max(1);
        self
    }

    pub fn rate_limit_base_wait_secs(mut self, secs: u64) -> Self {
        self.config.rate_limit_base_wait_secs = secs;
        self
    }

    pub fn fail_fast_on_client_errors(mut self, v: bool) -> Self {
        self.config.fail_fast_on_client_errors = v;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn force_overwrite(mut self, v: bool) -> Self {
        self.config.force_overwrite = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranslationConfig, TranslateError> {
        let c = &self.config;
        if c.target_language.is_empty() {
            return Err(TranslateError::InvalidConfig(
                "Target language must not be empty".into(),
            ));
        }
        if c.provider.is_none() && c.provider_name.parse::<ProviderKind>().is_err() {
            return Err(TranslateError::InvalidConfig(format!(
                "Unknown provider '{}' (expected gemini, openai, anthropic or claude)",
                c.provider_name
            )));
        }
        for (name, p) in [("page", &c.page_retry), ("call", &c.call_retry)] {
            if p.max_attempts == 0 {
                return Err(TranslateError::InvalidConfig(format!(
                    "{} retry needs at least one attempt",
                    name
                )));
            }
            if !p.multiplier.is_finite() || p.multiplier < 0.0 {
                return Err(TranslateError::InvalidConfig(format!(
                    "{} retry multiplier must be a finite non-negative number, got {}",
                    name, p.multiplier
                )));
            }
            if p.min_wait > p.max_wait {
                return Err(TranslateError::InvalidConfig(format!(
                    "{} retry min wait {:?} exceeds max wait {:?}",
                    name, p.min_wait, p.max_wait
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n".
    None,
    /// Horizontal rule: "\n\n---\n\n" (default)
    #[default]
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TranslationConfig::default();
        assert_eq!(c.provider_name, "gemini");
        assert_eq!(c.target_language, "ja");
        assert_eq!(c.watchdog(), Duration::from_secs(500));
        assert_eq!(c.page_retry.max_attempts, 5);
        assert_eq!(c.call_retry.min_wait, Duration::from_secs(10));
        assert_eq!(c.page_separator, PageSeparator::HorizontalRule);
        assert!(!c.fail_fast_on_client_errors);
    }

    #[test]
    fn builder_clamps_and_normalises() {
        let c = TranslationConfig::builder()
            .provider_name("  Claude ")
            .temperature(9.0)
            .watchdog_secs(0)
            .page_max_attempts(0)
            .build()
            .unwrap();
        assert_eq!(c.provider_name, "claude");
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.watchdog_secs, 1);
        assert_eq!(c.page_retry.max_attempts, 1);
    }

    #[test]
    fn build_rejects_unknown_provider_and_empty_language() {
        assert!(matches!(
            TranslationConfig::builder().provider_name("mistral").build(),
            Err(TranslateError::InvalidConfig(_))
        ));
        assert!(matches!(
            TranslationConfig::builder().target_language("  ").build(),
            Err(TranslateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn build_rejects_inverted_backoff_window() {
        let policy = RetryPolicy::new(3, 1.0, Duration::from_secs(20), Duration::from_secs(5));
        assert!(TranslationConfig::builder().call_retry(policy).build().is_err());
    }

    #[test]
    fn build_rejects_non_finite_multiplier() {
        for m in [f64::NAN, f64::INFINITY, -1.0] {
            let mut policy = RetryPolicy::default();
            policy.multiplier = m;
            assert!(TranslationConfig::builder().page_retry(policy).build().is_err());
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = TranslationConfig::builder()
            .api_key("sk-very-secret")
            .build()
            .unwrap();
        let s = format!("{:?}", c);
        assert!(!s.contains("sk-very-secret"));
        assert!(s.contains("<redacted>"));
    }

    #[test]
    fn explicit_key_builds_provider() {
        let c = TranslationConfig::builder()
            .provider_name("openai")
            .api_key("k")
            .model("gpt-4.1-mini")
            .build()
            .unwrap();
        let p = c.resolve_provider().unwrap();
        assert_eq!(p.identity().name, "openai");
        assert_eq!(p.identity().model, "gpt-4.1-mini");
    }

    #[test]
    fn empty_key_is_not_configured() {
        let c = TranslationConfig::builder()
            .provider_name("anthropic")
            .api_key("")
            .build()
            .unwrap();
        let err = c.resolve_provider().unwrap_err();
        assert!(matches!(err, TranslateError::ProviderNotConfigured { .. }));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn separators_render() {
        assert_eq!(PageSeparator::HorizontalRule.render(2), "\n\n---\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(PageSeparator::None.render(1), "\n\n");
    }
}
