//! Model gateway: a uniform chat interface over interchangeable backends.
//!
//! [`ProviderGateway`] dispatches a request to the adapter selected by its
//! [`ChatModel`] tag; [`RetryingGateway`] wraps any gateway with the
//! rate-limit retry discipline. Everything upstream of the pipeline talks to
//! the [`ChatGateway`] trait only.

pub mod anthropic;
pub mod clova;
pub mod error;
mod http;
pub mod openai;
pub mod types;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use anthropic::AnthropicAdapter;
use clova::ClovaAdapter;
use openai::OpenAiAdapter;

pub use error::{ErrorContext, ProviderError, DEFAULT_RETRY_AFTER};
pub use types::*;

/// Trait for chat completion backends.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// The gateway surface the pipeline calls through.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait::async_trait]
impl<T: ChatGateway + ?Sized> ChatGateway for std::sync::Arc<T> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}

// =============================================================================
// PROVIDER DISPATCH
// =============================================================================

/// Gateway over the configured backend adapters. The request's model tag
/// picks the adapter; an unconfigured backend is a `Config` error, not a
/// panic, so a deployment can carry credentials for any subset of providers.
#[derive(Default)]
pub struct ProviderGateway {
    openai: Option<OpenAiAdapter>,
    anthropic: Option<AnthropicAdapter>,
    clova: Option<ClovaAdapter>,
}

impl ProviderGateway {
    /// Build adapters for every provider whose credentials are present in the
    /// environment. Fails only if no provider is configured at all.
    pub fn from_env() -> Result<Self, ProviderError> {
        let gateway = Self {
            openai: OpenAiAdapter::from_env().ok(),
            anthropic: AnthropicAdapter::from_env().ok(),
            clova: ClovaAdapter::from_env().ok(),
        };

        if gateway.openai.is_none() && gateway.anthropic.is_none() && gateway.clova.is_none() {
            return Err(ProviderError::config("no provider credentials configured"));
        }
        Ok(gateway)
    }

    pub fn with_openai(mut self, adapter: OpenAiAdapter) -> Self {
        self.openai = Some(adapter);
        self
    }

    pub fn with_anthropic(mut self, adapter: AnthropicAdapter) -> Self {
        self.anthropic = Some(adapter);
        self
    }

    pub fn with_clova(mut self, adapter: ClovaAdapter) -> Self {
        self.clova = Some(adapter);
        self
    }

    fn provider_for(&self, model: &ChatModel) -> Result<&dyn ChatProvider, ProviderError> {
        let provider: Option<&dyn ChatProvider> = match model {
            ChatModel::OpenAi(_) => self.openai.as_ref().map(|a| a as _),
            ChatModel::Anthropic(_) => self.anthropic.as_ref().map(|a| a as _),
            ChatModel::Clova(_) => self.clova.as_ref().map(|a| a as _),
        };
        provider.ok_or_else(|| {
            ProviderError::config(format!("{} adapter not configured", model.provider()))
        })
    }
}

#[async_trait::async_trait]
impl ChatGateway for ProviderGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let provider = self.provider_for(&req.model)?;
        debug!(
            provider = req.model.provider(),
            model = req.model.model_id(),
            messages = req.messages.len(),
            "gateway dispatch"
        );
        provider.chat(&req).await
    }
}

// =============================================================================
// RETRYING INVOKER
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total call budget, counting the first attempt.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Wraps a gateway with bounded retry on rate limits.
///
/// Only `RateLimited` failures are retried: the task sleeps for the provider's
/// suggested delay (20 s when none was given) and resends the identical
/// payload. Any other failure propagates immediately. The wait blocks the
/// calling task only; concurrent synthesis tasks keep independent retry state.
pub struct RetryingGateway<G> {
    inner: G,
    config: RetryConfig,
}

impl<G: ChatGateway> RetryingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: G, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.inner.chat(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = err.retry_after().unwrap_or(DEFAULT_RETRY_AFTER);
                    warn!(attempt, delay_secs = delay.as_secs_f64(), "rate limited, backing off");
                    sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempts = max_attempts, "retry budget exhausted");
                    return Err(ProviderError::RetriesExhausted {
                        attempts: max_attempts,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProviderError::RetriesExhausted {
            attempts: max_attempts,
        })
    }
}

#[async_trait::async_trait]
impl<G: ChatGateway> ChatGateway for RetryingGateway<G> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        RetryingGateway::chat(self, req).await
    }
}
