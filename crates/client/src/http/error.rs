//! Transport error types and their retry classification.

use std::time::Duration;

use carelink_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the resilient HTTP client.
///
/// Every variant carries the correlation id of the originating logical call
/// so retries and refresh attempts can be cross-referenced in logs. The type
/// is `Clone` because coalesced callers (cache single-flight, shared token
/// refresh) all receive the same error value.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network error: {message} [correlation {correlation_id}]")]
    Network { message: String, correlation_id: Uuid },

    #[error("request timed out after {timeout:?} [correlation {correlation_id}]")]
    Timeout { timeout: Duration, correlation_id: Uuid },

    #[error("circuit breaker open [correlation {correlation_id}]")]
    CircuitOpen { retry_after: Option<Duration>, correlation_id: Uuid },

    #[error("authentication failed: {message} [correlation {correlation_id}]")]
    Authentication { message: String, correlation_id: Uuid },

    #[error("rate limited [correlation {correlation_id}]")]
    RateLimit { retry_after: Option<Duration>, correlation_id: Uuid },

    #[error("server error {status}: {message} [correlation {correlation_id}]")]
    Server { status: u16, message: String, correlation_id: Uuid },

    #[error("request rejected with {status}: {message} [correlation {correlation_id}]")]
    Client { status: u16, message: String, correlation_id: Uuid },

    #[error("response decoding failed: {message} [correlation {correlation_id}]")]
    Decode { message: String, correlation_id: Uuid },
}

impl TransportError {
    /// The correlation id of the logical call that produced this error.
    pub fn correlation_id(&self) -> Uuid {
        match self {
            TransportError::Network { correlation_id, .. }
            | TransportError::Timeout { correlation_id, .. }
            | TransportError::CircuitOpen { correlation_id, .. }
            | TransportError::Authentication { correlation_id, .. }
            | TransportError::RateLimit { correlation_id, .. }
            | TransportError::Server { correlation_id, .. }
            | TransportError::Client { correlation_id, .. }
            | TransportError::Decode { correlation_id, .. } => *correlation_id,
        }
    }

    /// True when the upstream understood the request and rejected it, as
    /// opposed to the request never getting a verdict (outage, timeout,
    /// open breaker).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransportError::Authentication { .. } | TransportError::Client { .. }
        )
    }
}

impl ErrorClassification for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network { .. }
                | TransportError::Timeout { .. }
                | TransportError::RateLimit { .. }
                | TransportError::Server { .. }
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            TransportError::Authentication { .. } => ErrorSeverity::Critical,
            TransportError::CircuitOpen { .. } | TransportError::Server { .. } => {
                ErrorSeverity::Error
            }
            _ => ErrorSeverity::Warning,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimit { retry_after, .. }
            | TransportError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
