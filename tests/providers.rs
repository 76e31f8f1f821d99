//! HTTP-level tests for the provider variants against a local mock server.
//!
//! Run with:
//!   cargo test --test providers

use edgequake_translate::{create_provider, Provider, ProviderError, ProviderSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn provider(name: &str, server: &MockServer, model: &str) -> Arc<dyn Provider> {
    let settings = ProviderSettings::new("test-key")
        .with_model(model)
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(5));
    create_provider(name, settings).unwrap()
}

const OPENAI_PATH: &str = "/v1/chat/completions";
const ANTHROPIC_PATH: &str = "/v1/messages";
const GEMINI_PATH: &str = "/v1beta/models/gemini-test:generateContent";

fn openai_reply(text: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": text }, "finish_reason": "stop" }]
    })
}

fn anthropic_reply(text: &str) -> serde_json::Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "stop_reason": "end_turn"
    })
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] }, "finishReason": "STOP" }]
    })
}

// ── OpenAI ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_sends_bearer_and_returns_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OPENAI_PATH))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("\"model\":\"gpt-test\""))
        .and(body_string_contains("Bonjour"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("こんにちは")))
        .expect(1)
        .mount(&server)
        .await;

    let p = provider("openai", &server, "gpt-test");
    assert_eq!(p.translate("Bonjour").await.unwrap(), "こんにちは");
    assert_eq!(p.identity().name, "openai");
}

#[tokio::test]
async fn openai_429_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OPENAI_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("Rate limit reached for requests"),
        )
        .mount(&server)
        .await;

    let err = provider("openai", &server, "gpt-test")
        .translate("x")
        .await
        .unwrap_err();
    match err {
        ProviderError::RateLimit { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected RateLimit, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_malformed_body_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OPENAI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = provider("openai", &server, "gpt-test")
        .translate("x")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api { .. }), "{err:?}");
}

#[tokio::test]
async fn openai_surrogate_rejection_is_encoding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OPENAI_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error":{"message":"We could not parse the JSON body of your request."}}"#,
        ))
        .mount(&server)
        .await;

    let err = provider("openai", &server, "gpt-test")
        .translate("x")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Encoding { .. }), "{err:?}");
}

// ── Anthropic ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_sends_key_and_version_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ANTHROPIC_PATH))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_reply("翻訳済み")))
        .expect(1)
        .mount(&server)
        .await;

    let p = provider("claude", &server, "claude-test");
    assert_eq!(p.translate("Translated").await.unwrap(), "翻訳済み");
    // The alias stays the provider's name.
    assert_eq!(p.identity().name, "claude");
}

#[tokio::test]
async fn anthropic_server_error_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ANTHROPIC_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = provider("anthropic", &server, "claude-test")
        .translate("x")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(503));
    assert!(matches!(err, ProviderError::HttpStatus { .. }));
}

#[tokio::test]
async fn anthropic_empty_content_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ANTHROPIC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "content": [], "stop_reason": "max_tokens" })),
        )
        .mount(&server)
        .await;

    let err = provider("anthropic", &server, "claude-test")
        .translate("x")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api { .. }), "{err:?}");
}

// ── Gemini ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_posts_to_model_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_string_contains("generationConfig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("# 1 序論")))
        .expect(1)
        .mount(&server)
        .await;

    let p = provider("gemini", &server, "gemini-test");
    assert_eq!(p.translate("1 Introduction").await.unwrap(), "# 1 序論");
}

#[tokio::test]
async fn gemini_retry_delay_in_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "code": 429,
                "status": "RESOURCE_EXHAUSTED",
                "details": [{ "retryDelay": "31s" }]
            }
        })))
        .mount(&server)
        .await;

    let err = provider("gemini", &server, "gemini-test")
        .translate("x")
        .await
        .unwrap_err();
    match err {
        ProviderError::RateLimit { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(31)));
        }
        other => panic!("expected RateLimit, got {other:?}"),
    }
}

#[tokio::test]
async fn gemini_blocked_prompt_reports_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [],
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&server)
        .await;

    let err = provider("gemini", &server, "gemini-test")
        .translate("x")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("SAFETY"), "{err}");
}

// ── Credential check ─────────────────────────────────────────────────────────

#[tokio::test]
async fn validate_credential_reflects_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("Hi")))
        .mount(&server)
        .await;
    assert!(provider("gemini", &server, "gemini-test").validate_credential().await);

    let denied = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&denied)
        .await;
    assert!(!provider("openai", &denied, "gpt-test").validate_credential().await);
}
