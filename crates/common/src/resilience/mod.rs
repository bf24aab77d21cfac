//! Resilience patterns for shielding the client from an unreliable backend.
//!
//! - **Circuit breaker**: stops calling a failing dependency for a cool-down
//!   period after repeated failures, evaluated lazily on the next attempt.
//! - **Retry**: exponential backoff with a cap, driven by
//!   [`ErrorClassification`](crate::error::ErrorClassification).
//! - **Single-flight**: coalesces concurrent identical operations into one
//!   underlying execution shared by all callers.
//!
//! All time-based behavior goes through the [`Clock`] trait so cool-downs,
//! TTLs, and windows are deterministic under test with [`MockClock`].

mod circuit_breaker;
mod clock;
mod retry;
mod singleflight;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, ConfigError,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{retry_with, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryError};
pub use singleflight::Singleflight;
