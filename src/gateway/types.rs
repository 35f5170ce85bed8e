//! Core types for the model gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat model specification. The variant selects the backend adapter; the
/// payload is the provider-side model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatModel {
    /// OpenAI chat completions, e.g. "gpt-4o"
    OpenAi(String),
    /// Anthropic messages API, e.g. "claude-3-opus-20240229"
    Anthropic(String),
    /// Clova Studio streaming completions, e.g. "HCX-003"
    Clova(String),
}

impl ChatModel {
    pub fn openai(model_id: impl Into<String>) -> Self {
        ChatModel::OpenAi(model_id.into())
    }

    pub fn anthropic(model_id: impl Into<String>) -> Self {
        ChatModel::Anthropic(model_id.into())
    }

    pub fn clova(model_id: impl Into<String>) -> Self {
        ChatModel::Clova(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ChatModel::OpenAi(id) | ChatModel::Anthropic(id) | ChatModel::Clova(id) => id,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ChatModel::OpenAi(_) => "openai",
            ChatModel::Anthropic(_) => "anthropic",
            ChatModel::Clova(_) => "clova",
        }
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model (and thereby backend) to use.
    pub model: ChatModel,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            temperature: 0.2,
            max_tokens: Some(4096),
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") | Some("end_turn") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from chat completion. The extracted plain-text answer is the only
/// value that crosses the gateway interface; tokens and latency ride along for
/// logging.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed, if the provider reported them.
    pub input_tokens: u32,
    /// Output tokens generated, if the provider reported them.
    pub output_tokens: u32,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}
