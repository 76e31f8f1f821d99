//! OpenAI chat-completions backend.

use super::{
    build_client, check_status, encode_body, endpoint, ProviderIdentity, ProviderSettings,
    RateLimitHints, VALIDATION_MAX_TOKENS, VALIDATION_PROMPT,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const HINTS: RateLimitHints = RateLimitHints {
    requests_per_minute: 500,
    tokens_per_minute: 200_000,
    requests_per_day: 10_000,
};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiProvider {
    identity: ProviderIdentity,
    api_key: String,
    base_url: Option<String>,
    max_output_tokens: Option<u32>,
    temperature: f32,
    client: OnceCell<reqwest::Client>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("identity", &self.identity)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn new(name: &str, settings: ProviderSettings) -> Self {
        Self {
            identity: settings.identity(name, DEFAULT_MODEL),
            max_output_tokens: settings.max_output_tokens,
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

    async fn complete(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String, ProviderError> {
        let body = encode_body(&ChatRequest {
            model: &self.identity.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens,
        })?;

        let url = endpoint(self.base_url.as_deref(), DEFAULT_BASE_URL, "/v1/chat/completions");
        let response = self
            .client()?
            .post(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let parsed: ChatResponse = check_status(response).await?.json().await?;
        extract_text(parsed)
    }
}

fn extract_text(response: ChatResponse) -> Result<String, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::api("OpenAI returned no choices"))?;
    let finish = choice.finish_reason.unwrap_or_else(|| "unknown".into());
    match choice.message.and_then(|m| m.content) {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::api(format!(
            "OpenAI returned an empty message (finish_reason: {finish})"
        ))),
    }
}

#[async_trait]
impl super::Provider for OpenAiProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    async fn translate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.identity.model, chars = prompt.len(), "openai request");
        self.complete(prompt, self.max_output_tokens).await
    }

    async fn validate_credential(&self) -> bool {
        match self
            .complete(VALIDATION_PROMPT, Some(VALIDATION_MAX_TOKENS))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("OpenAI credential check failed: {}", e);
                false
            }
        }
    }

    fn rate_limit_hints(&self) -> RateLimitHints {
        HINTS
    }
}
