//! Text completion backends used by the summarizer.
//!
//! The [`CompletionService`] trait takes a system prompt and a user prompt
//! and returns the model's raw text. Two backends exist:
//!
//! - **[`AnthropicClient`]**: the Anthropic Messages API (`POST /v1/messages`).
//! - **[`OllamaClient`]**: a local Ollama instance (`POST /api/generate`).
//!
//! Use [`create_completion_service`] to pick one from [`AiConfig`].
//!
//! # Retry Strategy
//!
//! Both clients wrap each request in the shared [`RetryPolicy`]:
//! - HTTP 429 → [`Error::RateLimit`], retried
//! - HTTP 5xx (including Anthropic's 529 "overloaded") and transport errors → [`Error::Network`], retried
//! - HTTP 401/403 → [`Error::Auth`], fatal
//! - Other 4xx → [`Error::Validation`], fatal

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OLLAMA_API_URL: &str = "http://localhost:11434";

/// A language model that turns prompts into text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Build the configured backend.
///
/// # Errors
///
/// [`Error::Config`] for an unknown provider, or for `anthropic` without an
/// API key.
pub fn create_completion_service(
    config: &AiConfig,
    retry: RetryPolicy,
) -> Result<Box<dyn CompletionService>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicClient::new(config, retry)?)),
        "ollama" => Ok(Box::new(OllamaClient::new(config, retry)?)),
        other => Err(Error::Config(format!(
            "unknown ai provider '{}'; expected anthropic or ollama",
            other
        ))),
    }
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

fn classify_status(service: &str, status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimit(format!("{} rate limit: {}", service, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("{} returned {}: {}", service, status, body))
        }
        s if s.is_server_error() => {
            Error::Network(format!("{} returned {}: {}", service, status, body))
        }
        _ => Error::Validation(format!("{} rejected the request ({}): {}", service, status, body)),
    }
}

// ============ Anthropic ============

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(config: &AiConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(format!(
                "no Anthropic API key; set {} or pass --anthropic-key",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            client: build_http_client(config.timeout_secs)?,
            api_url: config
                .api_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry,
        })
    }

    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_transport("Anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("Anthropic", status, &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::AiResponse(format!("malformed Anthropic response: {}", e)))?;

        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| Error::AiResponse("Anthropic response had no text content".to_string()))
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting completion");
        self.retry
            .run("Anthropic completion", || self.send(system, prompt))
            .await
    }
}

// ============ Ollama ============

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(config: &AiConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout_secs)?,
            api_url: config
                .api_url
                .as_deref()
                .unwrap_or(OLLAMA_API_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry,
        })
    }

    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            system,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_transport("Ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::AiResponse(format!("malformed Ollama response: {}", e)))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.retry
            .run("Ollama completion", || self.send(system, prompt))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn anthropic_config(server: &MockServer) -> AiConfig {
        AiConfig {
            api_url: Some(server.uri()),
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn test_anthropic_returns_first_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "system": "be terse",
                "messages": [{ "role": "user", "content": "hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": "{\"summary\":\"Hi\"}" }]
            })))
            .mount(&server)
            .await;

        let client =
            AnthropicClient::new(&anthropic_config(&server), RetryPolicy::immediate(1)).unwrap();
        let text = client.complete("be terse", "hello").await.unwrap();
        assert_eq!(text, "{\"summary\":\"Hi\"}");
    }

    #[tokio::test]
    async fn test_anthropic_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": "ok" }]
            })))
            .mount(&server)
            .await;

        let client =
            AnthropicClient::new(&anthropic_config(&server), RetryPolicy::immediate(3)).unwrap();
        assert_eq!(client.complete("s", "p").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_anthropic_bad_key_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            AnthropicClient::new(&anthropic_config(&server), RetryPolicy::immediate(3)).unwrap();
        let err = client.complete("s", "p").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_anthropic_requires_key() {
        let config = AiConfig::default();
        assert!(matches!(
            create_completion_service(&config, RetryPolicy::immediate(1)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_ollama_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3",
                "response": "generated",
                "done": true
            })))
            .mount(&server)
            .await;

        let config = AiConfig {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            api_url: Some(server.uri()),
            ..AiConfig::default()
        };
        let service = create_completion_service(&config, RetryPolicy::immediate(1)).unwrap();
        assert_eq!(service.model_name(), "llama3");
        assert_eq!(service.complete("s", "p").await.unwrap(), "generated");
    }
}
