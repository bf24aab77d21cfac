//! Session error types.

use std::time::Duration;

use carelink_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

use super::types::SessionState;
use crate::http::TransportError;
use crate::store::StoreError;

/// Errors surfaced by the session guard.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid second-factor code: {reason}")]
    InvalidMfaCode { reason: String },

    #[error("second-factor code expired")]
    MfaExpired,

    #[error("account locked, try again in {retry_after:?}")]
    AccountLocked { retry_after: Duration },

    #[error("maximum login attempts exceeded ({attempts})")]
    MaxAttemptsExceeded { attempts: u32 },

    #[error("operation {operation} is not valid in state {state}")]
    InvalidTransition { state: SessionState, operation: &'static str },

    #[error("no active session")]
    NotAuthenticated,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ErrorClassification for SessionError {
    fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            SessionError::AccountLocked { .. } | SessionError::MaxAttemptsExceeded { .. } => {
                ErrorSeverity::Error
            }
            SessionError::Transport(e) => e.severity(),
            SessionError::Storage(e) => e.severity(),
            _ => ErrorSeverity::Warning,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SessionError::AccountLocked { retry_after } => Some(*retry_after),
            SessionError::Transport(e) => e.retry_after(),
            _ => None,
        }
    }
}
