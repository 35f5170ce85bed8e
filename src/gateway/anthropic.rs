//! Anthropic adapter for the messages API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{error_from_status, extract_request_id};
use super::types::*;
use super::ChatProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API adapter for the messages endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    /// Create from API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, "https://api.anthropic.com/v1", Duration::from_secs(120))
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::config("ANTHROPIC_API_KEY not set"))?;

        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1".into());

        Self::with_config(api_key, base_url, Duration::from_secs(120))
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert("x-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct MessagesApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct MessagesApiResponse {
    content: Option<Vec<ContentBlock>>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for AnthropicAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();

        let api_req = MessagesApiRequest {
            model: req.model.model_id(),
            max_tokens: req.max_tokens.unwrap_or(4096),
            temperature: req.temperature,
            messages: &req.messages,
        };

        let response = self
            .client
            .post(self.messages_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = extract_request_id(response.headers());
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let code = serde_json::from_str::<MessagesApiResponse>(&body)
                .ok()
                .and_then(|p| p.error)
                .and_then(|e| e.error_type);
            return Err(error_from_status(
                "anthropic", status, &headers, request_id, code, &body,
            ));
        }

        let parsed: MessagesApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::protocol("anthropic", format!("Invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::protocol(
                "anthropic",
                error.message.unwrap_or_default(),
            ));
        }

        let content = parsed
            .content
            .and_then(|blocks| blocks.into_iter().next())
            .and_then(|b| b.text)
            .ok_or_else(|| ProviderError::protocol("anthropic", "No text block in response"))?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(parsed.stop_reason),
        })
    }
}
