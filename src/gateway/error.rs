//! Error types for the model gateway.

use std::time::Duration;
use thiserror::Error;

/// Suggested delay to wait after a rate limit when the provider sends no hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(20);

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling a generative backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure or upstream outage - the service could not be reached
    /// or did not answer usefully.
    #[error("{provider} unavailable: {message}")]
    Unavailable {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// The upstream answered but the response does not match the wire contract
    /// (missing field, missing terminal stream frame, unparsable body).
    #[error("{provider} protocol error: {message}")]
    Protocol {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Authentication or authorization failure - permanent, don't retry.
    #[error("{provider} auth error: {message}")]
    Auth {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Rate limited - caller should retry after the suggested duration.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// The retry budget was spent on consecutive rate limits - terminal.
    #[error("rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create an unavailable error.
    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider,
            message: message.into(),
            context: None,
        }
    }

    /// Create a protocol error.
    pub fn protocol(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
            context: None,
        }
    }

    /// Create a protocol error with context.
    pub fn protocol_with_context(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create an auth error.
    pub fn auth(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Auth {
            provider,
            message: message.into(),
            context: None,
        }
    }

    /// Create a rate limited error with the provider's suggested delay.
    pub fn rate_limited(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the retrying invoker may retry this error. Only rate limits
    /// are retried; everything else propagates to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Suggested delay before retrying, for rate limits.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Protocol { .. } => "protocol_error",
            Self::Auth { .. } => "auth_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Unavailable { context, .. } => context.as_ref(),
            Self::Protocol { context, .. } => context.as_ref(),
            Self::Auth { context, .. } => context.as_ref(),
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::RetriesExhausted { .. } => None,
            Self::Config(_) => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // A transport-level reqwest error means the service never produced a
        // usable response.
        Self::Unavailable {
            provider: "http",
            message: e.to_string(),
            context: None,
        }
    }
}
