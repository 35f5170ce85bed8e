//! Clova Studio adapter for streamed chat completions.
//!
//! Clova answers over server-sent events; the full answer is repeated in the
//! terminal `result` data frame, so the adapter reads the whole stream and
//! unwraps that frame rather than assembling token deltas.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{error_from_status, extract_request_id};
use super::types::*;
use super::ChatProvider;

/// Clova Studio API adapter.
#[derive(Debug, Clone)]
pub struct ClovaAdapter {
    client: reqwest::Client,
    host: String,
}

impl ClovaAdapter {
    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let host =
            std::env::var("CLOVA_HOST").map_err(|_| ProviderError::config("CLOVA_HOST not set"))?;
        let api_key = std::env::var("CLOVA_API_KEY")
            .map_err(|_| ProviderError::config("CLOVA_API_KEY not set"))?;
        let gateway_key = std::env::var("CLOVA_API_GATEWAY_KEY")
            .map_err(|_| ProviderError::config("CLOVA_API_GATEWAY_KEY not set"))?;
        let request_id = std::env::var("CLOVA_REQUEST_ID")
            .map_err(|_| ProviderError::config("CLOVA_REQUEST_ID not set"))?;

        Self::with_config(host, api_key, gateway_key, request_id, Duration::from_secs(120))
    }

    /// Create with custom configuration.
    pub fn with_config(
        host: impl Into<String>,
        api_key: impl Into<String>,
        gateway_key: impl Into<String>,
        request_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let host = host.into();

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        for (name, value) in [
            ("X-NCP-CLOVASTUDIO-API-KEY", api_key.into()),
            ("X-NCP-APIGW-API-KEY", gateway_key.into()),
            ("X-NCP-CLOVASTUDIO-REQUEST-ID", request_id.into()),
        ] {
            let v = HeaderValue::from_str(&value)
                .map_err(|_| ProviderError::config(format!("Invalid {name} value")))?;
            headers.insert(name, v);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, host })
    }

    fn completions_url(&self, model_id: &str) -> String {
        format!("{}/testapp/v1/chat-completions/{}", self.host, model_id)
    }

    /// Unwrap the answer from the terminal data frame of an SSE body.
    ///
    /// Token-delta frames and the result frame share the `{"message": {...}}`
    /// shape; the result frame is the last one carrying message content, so a
    /// reverse scan over `data:` lines finds it.
    fn terminal_frame_content(body: &str) -> Option<String> {
        body.lines()
            .rev()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .filter_map(|payload| serde_json::from_str::<StreamFrame>(payload.trim()).ok())
            .find_map(|frame| frame.message.and_then(|m| m.content))
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionApiRequest<'a> {
    messages: &'a [Message],
    top_p: f32,
    top_k: u32,
    max_tokens: u32,
    temperature: f32,
    repeat_penalty: f32,
    stop_before: Vec<String>,
    include_ai_filters: bool,
    seed: u64,
}

#[derive(Deserialize)]
struct StreamFrame {
    message: Option<FrameMessage>,
}

#[derive(Deserialize)]
struct FrameMessage {
    content: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for ClovaAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();

        let api_req = CompletionApiRequest {
            messages: &req.messages,
            top_p: 0.47,
            top_k: 0,
            max_tokens: req.max_tokens.unwrap_or(4096),
            temperature: req.temperature,
            repeat_penalty: 0.16,
            stop_before: Vec::new(),
            include_ai_filters: false,
            seed: 0,
        };

        let response = self
            .client
            .post(self.completions_url(req.model.model_id()))
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = extract_request_id(response.headers());
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_status(
                "clova", status, &headers, request_id, None, &body,
            ));
        }

        let content = Self::terminal_frame_content(&body).ok_or_else(|| {
            ProviderError::protocol("clova", "No terminal data frame in event stream")
        })?;

        Ok(ChatResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            latency: start.elapsed(),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_frame_wins_over_token_deltas() {
        let body = "\
id:1\n\
event:token\n\
data:{\"message\": {\"content\": \"hel\"}}\n\
\n\
id:2\n\
event:token\n\
data:{\"message\": {\"content\": \"lo\"}}\n\
\n\
id:3\n\
event:result\n\
data:{\"message\": {\"content\": \"hello\"}, \"inputLength\": 4}\n\
\n\
event:signal\n\
data:[DONE]\n";
        assert_eq!(
            ClovaAdapter::terminal_frame_content(body).as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn missing_terminal_frame_is_none() {
        assert_eq!(ClovaAdapter::terminal_frame_content("event:signal\ndata:[DONE]\n"), None);
        assert_eq!(ClovaAdapter::terminal_frame_content(""), None);
    }
}
