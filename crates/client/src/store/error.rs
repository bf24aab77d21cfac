//! Storage error types.

use carelink_common::error::{ErrorClassification, ErrorSeverity};
use carelink_common::CryptoError;
use thiserror::Error;

/// Errors surfaced by the secure store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid storage key: {reason}")]
    InvalidKey { reason: String },

    #[error("storage quota exceeded: write of {attempted} bytes would pass the {budget} byte budget")]
    QuotaExceeded { attempted: usize, budget: usize },

    #[error("no encryption key provisioned")]
    MissingEncryptionKey,

    #[error("entry was written under encryption version {found}, current version is {current}")]
    IncompatibleVersion { found: u32, current: u32 },

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ErrorClassification for StoreError {
    fn is_retryable(&self) -> bool {
        // Local storage operations either succeed or fail deterministically.
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            StoreError::MissingEncryptionKey | StoreError::Crypto(_) => ErrorSeverity::Critical,
            StoreError::Backend(_) => ErrorSeverity::Error,
            StoreError::IncompatibleVersion { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_never_retryable() {
        let err = StoreError::QuotaExceeded { attempted: 100, budget: 50 };
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_key_is_critical() {
        assert!(StoreError::MissingEncryptionKey.is_critical());
        assert!(!StoreError::InvalidKey { reason: "empty".into() }.is_critical());
    }
}
