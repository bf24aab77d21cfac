//! Error classification shared across the data-access layer.
//!
//! Every module in the workspace defines its own `thiserror` enum for the
//! failures it can produce. What they share is *classification*: whether an
//! error is worth retrying, how severe it is, and whether the producer
//! suggested a delay before the next attempt. The retry executor and the
//! HTTP client are both driven by this trait rather than by concrete error
//! types.

use std::time::Duration;

/// Severity level for monitoring and log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected conditions (missing entry, empty result).
    Info,
    /// Degraded but operational (transient failure, rate limiting).
    Warning,
    /// Failure requiring attention (network error, invalid input).
    Error,
    /// System integrity at risk (corrupt storage, crypto failure).
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Whether retrying the failed operation can reasonably succeed.
    fn is_retryable(&self) -> bool;

    /// Severity for monitoring and alerting.
    fn severity(&self) -> ErrorSeverity;

    /// Whether this error requires immediate attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Producer-suggested delay before the next attempt, if any
    /// (e.g. a `Retry-After` header).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for error classification.
    use super::*;

    struct Transient;

    impl ErrorClassification for Transient {
        fn is_retryable(&self) -> bool {
            true
        }

        fn severity(&self) -> ErrorSeverity {
            ErrorSeverity::Warning
        }
    }

    #[test]
    fn severity_ordering_matches_escalation() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn default_classification_has_no_retry_hint() {
        let err = Transient;
        assert!(err.is_retryable());
        assert!(!err.is_critical());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn severity_display_is_uppercase() {
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ErrorSeverity::Info.to_string(), "INFO");
    }
}
