//! Foundation utilities shared across Carelink crates.
//!
//! This crate carries no domain knowledge. It provides the building blocks
//! the data-access layer is assembled from:
//!
//! - `error`: error severity and classification traits
//! - `resilience`: clock abstraction, circuit breaker, retry executor, and
//!   request coalescing (single-flight)
//! - `crypto`: AES-256-GCM encryption primitives

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod crypto;
pub mod error;
pub mod resilience;

// Re-export commonly used types for convenience
pub use crypto::{CryptoError, EncryptedData, EncryptionService};
pub use error::{ErrorClassification, ErrorSeverity};
pub use resilience::{
    retry_with, BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitState, Clock, MockClock, RetryConfig, RetryError, Singleflight, SystemClock,
};
