//! Anthropic Messages API backend. Registered as both `anthropic` and
//! `claude`.

use super::{
    build_client, check_status, encode_body, endpoint, ProviderIdentity, ProviderSettings,
    RateLimitHints, VALIDATION_MAX_TOKENS, VALIDATION_PROMPT,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

/// Output ceiling of the default model.
pub const DEFAULT_MAX_TOKENS: u32 = 64_000;

const HINTS: RateLimitHints = RateLimitHints {
    requests_per_minute: 50,
    tokens_per_minute: 40_000,
    requests_per_day: 1_000,
};

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

pub struct AnthropicProvider {
    identity: ProviderIdentity,
    api_key: String,
    base_url: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: OnceCell<reqwest::Client>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("identity", &self.identity)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    pub fn new(name: &str, settings: ProviderSettings) -> Self {
        Self {
            identity: settings.identity(name, DEFAULT_MODEL),
            max_tokens: settings.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
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

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let body = encode_body(&MessagesRequest {
            model: &self.identity.model,
            max_tokens,
            temperature: self.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        })?;

        let url = endpoint(self.base_url.as_deref(), DEFAULT_BASE_URL, "/v1/messages");
        let response = self
            .client()?
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let parsed: MessagesResponse = check_status(response).await?.json().await?;
        extract_text(parsed)
    }
}

/// Concatenated text blocks; an empty or missing first block is an error.
fn extract_text(response: MessagesResponse) -> Result<String, ProviderError> {
    if response.content.is_empty() {
        return Err(ProviderError::api("Anthropic returned no content blocks"));
    }
    let text: String = response
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text.as_deref())
        .collect();
    if text.trim().is_empty() {
        return Err(ProviderError::api(format!(
            "Anthropic returned no text (stop_reason: {})",
            response.stop_reason.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(text)
}

#[async_trait]
impl super::Provider for AnthropicProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    async fn translate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.identity.model, chars = prompt.len(), "anthropic request");
        self.complete(prompt, self.max_tokens).await
    }

    async fn validate_credential(&self) -> bool {
        match self.complete(VALIDATION_PROMPT, VALIDATION_MAX_TOKENS).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Anthropic credential check failed: {}", e);
                false
            }
        }
    }

    fn rate_limit_hints(&self) -> RateLimitHints {
        HINTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, ProviderError> {
        extract_text(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn joins_text_blocks() {
        let out = parse(
            r##"{"content":[{"type":"text","text":"# 1 "},{"type":"text","text":"序論"}],"stop_reason":"end_turn"}"##,
        );
        assert_eq!(out.unwrap(), "# 1 序論");
    }

    #[test]
    fn empty_content_is_api_error() {
        assert!(matches!(parse(r#"{"content":[]}"#), Err(ProviderError::Api { .. })));
    }

    #[test]
    fn blank_text_reports_stop_reason() {
        let err = parse(r#"{"content":[{"type":"text","text":""}],"stop_reason":"max_tokens"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }
}
