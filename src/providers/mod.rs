//! Provider adapters - vendor AI integrations
//!
//! ## Responsibilities
//!
//! - One adapter per vendor behind a single trait
//! - Translate a canonical request into the vendor wire format
//! - Parse heterogeneous responses into a canonical result
//! - Classify vendor failures into the retryable/terminal taxonomy

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod prompt;
pub mod taxonomy;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

use crate::media_preparer::MediaPayload;
use crate::models::DetectedObject;
use crate::settings::{ProviderConfig, ProviderKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single provider call
///
/// `RateLimited`, `Server` and `Timeout` are transient and eligible for
/// retry; `Auth` and `Malformed` escalate to the next provider immediately.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider asked us to back off (HTTP 429)
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Credential rejected (HTTP 401/403)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider-side failure (HTTP 5xx, connection errors)
    #[error("server error: {0}")]
    Server(String),

    /// Call exceeded its timeout
    #[error("request timed out")]
    Timeout,

    /// Response could not be understood, or the request itself is
    /// unprocessable for this provider
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Short kind string used in fallback chains and usage rows
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Auth(_) => "auth_error",
            ProviderError::Server(_) => "server_error",
            ProviderError::Timeout => "timeout",
            ProviderError::Malformed(_) => "malformed",
        }
    }

    /// Whether another attempt against the same provider can help
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Server(_) | ProviderError::Timeout
        )
    }
}

/// Canonical parsed result of one provider call
#[derive(Debug, Clone)]
pub struct CanonicalResult {
    pub description: String,
    /// 0-100
    pub confidence: u8,
    pub objects_detected: Vec<DetectedObject>,
    pub tokens_used: Option<u32>,
}

/// Request context shared by every adapter
#[derive(Debug, Clone)]
pub struct CallContext {
    pub camera_name: String,
    pub event_timestamp: DateTime<Utc>,
    /// Pre-built analysis prompt (see [`prompt`])
    pub prompt: String,
}

/// Vendor adapter interface
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Configured provider name
    fn name(&self) -> &str;

    /// Run one analysis call against the vendor
    async fn call(
        &self,
        payload: &MediaPayload,
        context: &CallContext,
        timeout: Duration,
    ) -> std::result::Result<CanonicalResult, ProviderError>;
}

/// Build the adapter for a provider configuration
pub fn build_adapter(config: &ProviderConfig) -> Arc<dyn ProviderAdapter> {
    match config.kind {
        ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => {
            Arc::new(OpenAiAdapter::new(config.clone()))
        }
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(config.clone())),
        ProviderKind::Claude => Arc::new(ClaudeAdapter::new(config.clone())),
    }
}

/// Map an HTTP error status to the failure taxonomy
pub(crate) fn error_from_status(
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(format!("HTTP {}: {}", status, truncate(&body, 200))),
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Server(format!("HTTP {}: {}", status, truncate(&body, 200))),
        _ => ProviderError::Malformed(format!("HTTP {}: {}", status, truncate(&body, 200))),
    }
}

/// Map a transport error to the failure taxonomy
pub(crate) fn error_from_reqwest(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Server(e.to_string())
    }
}

/// Retry-After header as a duration, if present and parseable
pub(crate) fn retry_after_from(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.kind(),
            "rate_limited"
        );
        assert_eq!(ProviderError::Auth("x".into()).kind(), "auth_error");
        assert_eq!(ProviderError::Server("x".into()).kind(), "server_error");
        assert_eq!(ProviderError::Timeout.kind(), "timeout");
        assert_eq!(ProviderError::Malformed("x".into()).kind(), "malformed");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Server("x".into()).is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(!ProviderError::Auth("x".into()).is_transient());
        assert!(!ProviderError::Malformed("x".into()).is_transient());
    }

    #[test]
    fn test_error_from_status() {
        let e = error_from_status(StatusCode::UNAUTHORIZED, "no key".into(), None);
        assert!(matches!(e, ProviderError::Auth(_)));

        let e = error_from_status(
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(Duration::from_secs(7)),
        );
        match e {
            ProviderError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        let e = error_from_status(StatusCode::BAD_GATEWAY, String::new(), None);
        assert!(matches!(e, ProviderError::Server(_)));

        let e = error_from_status(StatusCode::NOT_FOUND, String::new(), None);
        assert!(matches!(e, ProviderError::Malformed(_)));
    }
}
