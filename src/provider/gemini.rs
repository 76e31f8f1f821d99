//! Google Gemini `generateContent` backend.

use super::{
    build_client, check_status, encode_body, endpoint, ProviderIdentity, ProviderSettings,
    RateLimitHints, VALIDATION_MAX_TOKENS, VALIDATION_PROMPT,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Output ceiling of the default model.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 65_536;

const HINTS: RateLimitHints = RateLimitHints {
    requests_per_minute: 60,
    tokens_per_minute: 1_000_000,
    requests_per_day: 1_500,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiProvider {
    identity: ProviderIdentity,
    api_key: String,
    base_url: Option<String>,
    max_output_tokens: u32,
    temperature: f32,
    client: OnceCell<reqwest::Client>,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("identity", &self.identity)
            .field("base_url", &self.base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    pub fn new(name: &str, settings: ProviderSettings) -> Self {
        Self {
            identity: settings.identity(name, DEFAULT_MODEL),
            max_output_tokens: settings
                .max_output_tokens
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            temperature: settings.temperature,
            base_url: settings.base_url,
            api_key: settings.api_key,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client, ProviderError> {
        self.client
            .get_or_try_init(|| build_client(self.identity.timeout))
    }

    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String, ProviderError> {
        let body = encode_body(&GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens,
            },
        })?;

        let path = format!("/v1beta/models/{}:generateContent", self.identity.model);
        let url = endpoint(self.base_url.as_deref(), DEFAULT_BASE_URL, &path);
        let response = self
            .client()?
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let parsed: GenerateResponse = check_status(response).await?.json().await?;
        extract_text(parsed)
    }
}

/// Text of the first candidate's parts. Missing candidates, missing parts or
/// blank text are reported with the finish or block reason when available.
fn extract_text(response: GenerateResponse) -> Result<String, ProviderError> {
    let block_reason = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .map(|r| format!(" (prompt blocked: {r})"))
        .unwrap_or_default();

    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        ProviderError::api(format!("Gemini returned no candidates{block_reason}"))
    })?;
    let finish = candidate.finish_reason.unwrap_or_else(|| "unknown".into());

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::api(format!(
            "Gemini returned no text (finishReason: {finish}){block_reason}"
        )));
    }
    Ok(text)
}

#[async_trait]
impl super::Provider for GeminiProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    async fn translate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.identity.model, chars = prompt.len(), "gemini request");
        self.complete(prompt, self.max_output_tokens).await
    }

    async fn validate_credential(&self) -> bool {
        match self.complete(VALIDATION_PROMPT, VALIDATION_MAX_TOKENS).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Gemini credential check failed: {}", e);
                false
            }
        }
    }

    fn rate_limit_hints(&self) -> RateLimitHints {
        HINTS
    }
}
