//! Resilient HTTP transport.
//!
//! The [`ResilientHttpClient`] is the single outbound pipeline: every call
//! gets a correlation id, passes the circuit breaker before any network I/O,
//! carries a bearer token sourced from the session, retries transient
//! failures with capped exponential backoff, and single-flights token
//! refresh on 401.

mod client;
mod error;
mod types;

pub use client::{HttpClientConfig, ResilientHttpClient, TokenSource};
pub use error::TransportError;
pub use types::{ApiError, ApiResponse, RequestOverrides};
