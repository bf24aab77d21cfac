//! Retry executor with exponential backoff.
//!
//! Backoff is exponential with a cap (`base_delay * factor^attempt`, clamped
//! to `max_delay`); this is the only strategy the layer uses. Whether an
//! error is worth retrying is decided by its
//! [`ErrorClassification`](crate::error::ErrorClassification), including any
//! producer-suggested delay (`retry_after`), which takes precedence over the
//! computed backoff.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorClassification;

/// Errors produced by the retry executor.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All attempts failed; carries the last error.
    #[error("all {attempts} retry attempts exhausted")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The operation failed with an error not worth retrying.
    #[error("operation failed with non-retryable error")]
    NonRetryable {
        #[source]
        source: E,
    },

    /// The configuration is invalid.
    #[error("invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Backoff strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// `base_delay * factor^attempt`, capped at `max_delay`.
    Exponential { base_delay: Duration, factor: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Delay before the given retry (0-based attempt index).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Exponential { base_delay, factor, max_delay } => {
                let delay = base_delay.as_millis() as f64 * factor.powi(attempt as i32);
                let capped = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(capped)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (initial try included).
    pub max_attempts: u32,
    /// Backoff strategy between attempts.
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: BackoffStrategy::default() }
    }
}

impl RetryConfig {
    /// Create a configuration builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate<E>(&self) -> Result<(), RetryError<E>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }
        let BackoffStrategy::Exponential { factor, .. } = &self.backoff;
        if *factor <= 0.0 {
            return Err(RetryError::InvalidConfiguration {
                message: "exponential factor must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn exponential_backoff(
        mut self,
        base_delay: Duration,
        factor: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { base_delay, factor, max_delay };
        self
    }

    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Execute an operation with retry, driven by error classification.
///
/// The operation is attempted up to `config.max_attempts` times. Errors that
/// classify as non-retryable abort immediately; retryable errors sleep for
/// the backoff delay (or the error's own `retry_after` hint) and try again.
pub async fn retry_with<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorClassification + std::error::Error,
{
    config.validate()?;

    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                debug!(error = %error, "non-retryable error, aborting");
                return Err(RetryError::NonRetryable { source: error });
            }
            Err(error) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    warn!(attempts = attempt, error = %error, "retry budget exhausted");
                    return Err(RetryError::AttemptsExhausted { attempts: attempt, last: error });
                }

                let delay =
                    error.retry_after().unwrap_or_else(|| config.backoff.delay_for(attempt - 1));
                debug!(attempt, ?delay, error = %error, "retrying after backoff");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
