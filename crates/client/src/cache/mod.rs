//! In-memory TTL query cache with stale-while-revalidate.
//!
//! Fresh entries are served synchronously with no loader call. Expired
//! entries are still served immediately while a background revalidation is
//! issued; `is_stale` signals this to consumers. Concurrent loads for the
//! same key are coalesced through the single-flight primitive, so at most
//! one network call per key is ever outstanding.

mod config;
mod query_cache;
mod stats;

pub use config::CacheConfig;
pub use query_cache::{QueryCache, QueryResult};
pub use stats::{CacheStats, MetricsCollector};
