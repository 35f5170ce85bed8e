//! Shared HTTP plumbing for the backend adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use super::error::{ErrorContext, ProviderError, DEFAULT_RETRY_AFTER};

/// Extract request ID from response headers.
pub(crate) fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Suggested retry delay from a Retry-After header, falling back to the
/// 20 second default when absent or unparsable. Only the delta-seconds form
/// is supported; HTTP-date values fall back to the default.
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Map a non-success HTTP status onto the gateway error taxonomy.
pub(crate) fn error_from_status(
    provider: &'static str,
    status: StatusCode,
    headers: &HeaderMap,
    request_id: Option<String>,
    provider_code: Option<String>,
    body: &str,
) -> ProviderError {
    let mut ctx = ErrorContext::new().with_status(status.as_u16());
    if let Some(id) = request_id {
        ctx = ctx.with_request_id(id);
    }
    if let Some(code) = provider_code {
        ctx = ctx.with_code(code);
    }

    let message = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        let preview: String = body.chars().take(300).collect();
        format!("HTTP {}: {}", status.as_u16(), preview)
    };

    match status.as_u16() {
        401 | 403 => ProviderError::Auth {
            provider,
            message,
            context: Some(ctx),
        },
        429 => ProviderError::rate_limited(retry_after(headers), ctx),
        500..=599 => ProviderError::Unavailable {
            provider,
            message,
            context: Some(ctx),
        },
        _ => ProviderError::Protocol {
            provider,
            message,
            context: Some(ctx),
        },
    }
}
