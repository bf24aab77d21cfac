//! Carelink client-side data-access core.
//!
//! Four components, leaves first:
//!
//! - [`store`]: encrypted key/value persistence over durable and
//!   session-scoped backends.
//! - [`http`]: the outbound request pipeline with correlation ids, auth
//!   injection, retry, circuit breaking and single-flighted token refresh.
//! - [`cache`]: in-memory TTL cache with stale-while-revalidate, in-flight
//!   de-duplication and recurring background refresh.
//! - [`session`]: the session state machine orchestrating login, MFA, idle
//!   and expiry, persisting through the store and calling the identity
//!   provider over the resilient client.
//!
//! Everything above this layer is presentation glue and lives in the host
//! application.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod http;
pub mod session;
pub mod store;
pub mod teardown;

pub use cache::{CacheConfig, CacheStats, QueryCache, QueryResult};
pub use http::{
    ApiError, ApiResponse, HttpClientConfig, RequestOverrides, ResilientHttpClient, TokenSource,
    TransportError,
};
pub use session::{
    AuthenticatedSession, Credentials, HttpIdentityProvider, IdentityProvider, LoginOutcome,
    MfaChallenge, SessionError, SessionGuard, SessionGuardConfig, SessionState, TokenSet,
    UserProfile,
};
pub use store::{
    FileBackend, MemoryBackend, SecureStore, SecureStoreConfig, StorageBackend, StorageScope,
    StoreError,
};
pub use teardown::TeardownHook;
