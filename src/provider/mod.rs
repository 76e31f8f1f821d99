//! Vendor backends behind one [`Provider`] trait.
//!
//! Each variant does exactly one thing: turn a prompt into text over its
//! vendor's REST API, and check the response shape before trusting it.
//! Retrying, rate-limit bookkeeping and prompt sanitisation live above this
//! layer, so a provider is also usable on its own by callers that want to
//! skip the orchestrator's heading logic.
//!
//! ## Why lazy clients?
//!
//! Building a `reqwest::Client` loads TLS roots and spawns a connection pool.
//! A provider created for `--validate-key` or never used (for example a
//! directory run where every output already exists) should not pay for that,
//! so each variant creates its client on first use through a `OnceCell`.
//!
//! ## Adding a vendor
//!
//! Add a [`ProviderKind`] variant, a submodule implementing [`Provider`] and
//! an arm in [`create_provider`].

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::error::ProviderError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(500);

/// Prompt used by [`Provider::validate_credential`].
pub const VALIDATION_PROMPT: &str = "Hello";

/// Output ceiling used by [`Provider::validate_credential`].
pub const VALIDATION_MAX_TOKENS: u32 = 10;

// ── Identity & metadata ──────────────────────────────────────────────────

/// Immutable description of a constructed provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderIdentity {
    /// Normalised name as requested (`"claude"` stays `"claude"`).
    pub name: String,
    pub model: String,
    pub timeout: Duration,
}

/// Published vendor limits. Informational only; nothing enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHints {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub requests_per_day: u32,
}

/// Summary returned by [`Provider::model_info`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub timeout_secs: u64,
    pub rate_limits: RateLimitHints,
}

// ── Trait ────────────────────────────────────────────────────────────────

/// A backend that turns a prompt into translated text.
///
/// One instance is bound to one (identity, model, credential) tuple for its
/// lifetime.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    fn identity(&self) -> &ProviderIdentity;

    fn default_model(&self) -> &'static str;

    /// Send `prompt` and return the response text.
    ///
    /// Malformed responses (no candidate, empty text) are reported as
    /// [`ProviderError::Api`] rather than panicking.
    async fn translate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// One minimal live call. `true` when the credential works.
    async fn validate_credential(&self) -> bool;

    fn rate_limit_hints(&self) -> RateLimitHints;

    fn model_info(&self) -> ModelInfo {
        let id = self.identity();
        ModelInfo {
            provider: id.name.clone(),
            model: id.model.clone(),
            timeout_secs: id.timeout.as_secs(),
            rate_limits: self.rate_limit_hints(),
        }
    }
}

// ── Kinds ────────────────────────────────────────────────────────────────

/// Supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
    ];

    /// Canonical lowercase id.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic Claude",
            ProviderKind::Gemini => "Google Gemini",
        }
    }

    /// Environment variable holding the credential.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => openai::DEFAULT_MODEL,
            ProviderKind::Anthropic => anthropic::DEFAULT_MODEL,
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    /// Case-insensitive; `claude` is an alias of `anthropic`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::Validation(format!(
                "unknown provider '{}' (expected one of: gemini, openai, anthropic, claude)",
                other
            ))),
        }
    }
}

/// Trim and lowercase a provider name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

// ── Settings & factory ───────────────────────────────────────────────────

/// Construction parameters shared by every variant.
#[derive(Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    /// `None` selects the variant's default model.
    pub model: Option<String>,
    pub timeout: Duration,
    /// Override the vendor endpoint (proxies, tests).
    pub base_url: Option<String>,
    /// `None` selects the variant's default ceiling.
    pub max_output_tokens: Option<u32>,
    pub temperature: f32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            base_url: None,
            max_output_tokens: None,
            temperature: 0.0,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("base_url", &self.base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_output_tokens(mut self, n: u32) -> Self {
        self.max_output_tokens = Some(n);
        self
    }

    fn identity(&self, name: &str, default_model: &str) -> ProviderIdentity {
        ProviderIdentity {
            name: name.to_string(),
            model: self
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_model.to_string()),
            timeout: self.timeout,
        }
    }
}

/// Build a provider from its name.
///
/// Fails with [`ProviderError::Validation`] for an unknown name or an empty
/// credential.
pub fn create_provider(
    name: &str,
    settings: ProviderSettings,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let kind: ProviderKind = name.parse()?;
    let name = normalize_name(name);
    if settings.api_key.trim().is_empty() {
        return Err(ProviderError::Validation(format!(
            "no API key for {} (set {})",
            kind.display_name(),
            kind.env_var()
        )));
    }

    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(&name, settings)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(&name, settings)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(&name, settings)),
    };
    tracing::debug!(
        provider = %provider.identity().name,
        model = %provider.identity().model,
        "provider created"
    );
    Ok(provider)
}

/// Credential for `kind` from its environment variable, if set and non-empty.
pub fn api_key_from_env(kind: ProviderKind) -> Option<String> {
    std::env::var(kind.env_var())
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

// ── HTTP helpers shared by the variants ──────────────────────────────────

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Transport {
            message: format!("could not build HTTP client: {e}"),
            timeout: false,
        })
}

/// Serialise a request body; failures surface as [`ProviderError::Encoding`].
pub(crate) fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, ProviderError> {
    serde_json::to_vec(body).map_err(|e| ProviderError::Encoding {
        message: e.to_string(),
    })
}

static RE_RETRY_DELAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).unwrap());
static RE_ENCODING_REJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)surrogate|invalid (?:utf-?8|unicode)|could not (?:parse|decode) the json body")
        .unwrap()
});

/// Server hint for when to retry: `retry-after-ms`, `retry-after` (seconds)
/// or a Gemini `retryDelay` field in the body.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap, body: &str) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    if let Some(ms) = header("retry-after-ms") {
        return Some(Duration::from_secs_f64(ms / 1000.0));
    }
    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs_f64(secs));
    }
    RE_RETRY_DELAY
        .captures(body)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(Duration::from_secs_f64)
}

/// Pass a 2xx response through; map anything else to a [`ProviderError`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status.as_u16(), &headers, &body))
}

pub(crate) fn status_error(
    status: u16,
    headers: &reqwest::header::HeaderMap,
    body: &str,
) -> ProviderError {
    let message = truncate(body.trim(), 500);
    match status {
        429 => ProviderError::RateLimit {
            retry_after: parse_retry_after(headers, body),
            message,
        },
        400 if RE_ENCODING_REJECTION.is_match(body) => ProviderError::Encoding { message },
        _ => ProviderError::HttpStatus {
            status_code: status,
            message,
        },
    }
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn redact(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

pub(crate) fn endpoint(base_url: Option<&str>, default: &str, path: &str) -> String {
    format!("{}{}", base_url.unwrap_or(default).trim_end_matches('/'), path)
}
