//! The query cache core.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use carelink_common::resilience::{Clock, ConfigError, Singleflight, SystemClock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::stats::{CacheStats, MetricsCollector};
use crate::http::TransportError;
use crate::teardown::TeardownHook;

/// What a fetch resolved to.
#[derive(Debug, Clone)]
pub struct QueryResult<V> {
    pub data: V,
    /// Set when the value came from an expired entry and a background
    /// revalidation was issued.
    pub is_stale: bool,
    /// False when the value was loaded from the network for this call.
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    inserted_seq: u64,
    marked_stale: bool,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        !self.marked_stale && now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// TTL cache with stale-while-revalidate, per-key load coalescing and
/// oldest-first eviction.
///
/// Clones share the same underlying cache. Loaders are only invoked on a
/// miss or for revalidation; at most one load per key is in flight at any
/// instant.
pub struct QueryCache<V, C: Clock = SystemClock> {
    config: CacheConfig,
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    insert_seq: Arc<AtomicU64>,
    flights: Arc<Singleflight<String, Result<V, TransportError>>>,
    watches: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    metrics: Arc<MetricsCollector>,
    clock: Arc<C>,
}

impl<V, C: Clock> Clone for QueryCache<V, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            entries: Arc::clone(&self.entries),
            insert_seq: Arc::clone(&self.insert_seq),
            flights: Arc::clone(&self.flights),
            watches: Arc::clone(&self.watches),
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V, C: Clock> std::fmt::Debug for QueryCache<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.config)
            .field("entries", &self.entries.read().map(|e| e.len()).unwrap_or(0))
            .finish()
    }
}

impl<V> QueryCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache using the system clock.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<V, C: Clock> QueryCache<V, C>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with a custom clock driving TTL evaluation.
    pub fn with_clock(config: CacheConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            insert_seq: Arc::new(AtomicU64::new(0)),
            flights: Arc::new(Singleflight::new()),
            watches: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(MetricsCollector::new()),
            clock: Arc::new(clock),
        })
    }

    /// Fetch through the cache with the default TTL.
    pub async fn fetch<L, Fut>(&self, key: &str, loader: L) -> Result<QueryResult<V>, TransportError>
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        self.fetch_with_ttl(key, self.config.default_ttl, loader).await
    }

    /// Fetch through the cache with an explicit TTL.
    ///
    /// Fresh hit: returned synchronously, loader untouched. Expired or
    /// marked-stale hit: returned immediately with `is_stale` set while a
    /// background revalidation runs. Miss: the loader runs through the
    /// per-key single-flight and the result is stored.
    pub async fn fetch_with_ttl<L, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: L,
    ) -> Result<QueryResult<V>, TransportError>
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        let now = self.clock.now();
        let cached = {
            let entries = self.entries.read().expect("cache map lock");
            entries.get(key).map(|entry| (entry.value.clone(), entry.is_fresh(now)))
        };

        match cached {
            Some((value, true)) => {
                self.metrics.record_hit();
                Ok(QueryResult { data: value, is_stale: false, from_cache: true })
            }
            Some((value, false)) => {
                self.metrics.record_stale_hit();
                debug!(key, "serving stale entry, revalidating in background");
                self.spawn_revalidation(key.to_string(), ttl, loader);
                Ok(QueryResult { data: value, is_stale: true, from_cache: true })
            }
            None => {
                self.metrics.record_miss();
                let data = self.load_coalesced(key.to_string(), ttl, loader).await?;
                Ok(QueryResult { data, is_stale: false, from_cache: false })
            }
        }
    }

    /// Invalidate the entry, then reload it from the network.
    pub async fn refetch<L, Fut>(&self, key: &str, loader: L) -> Result<QueryResult<V>, TransportError>
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        self.invalidate(key);
        let data = self.load_coalesced(key.to_string(), self.config.default_ttl, loader).await?;
        Ok(QueryResult { data, is_stale: false, from_cache: false })
    }

    /// Drop the entry for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().expect("cache map lock").remove(key);
    }

    /// Mark the entry stale without dropping it; the next fetch serves it
    /// with `is_stale` set and revalidates in the background.
    pub fn mark_stale(&self, key: &str) {
        if let Some(entry) = self.entries.write().expect("cache map lock").get_mut(key) {
            entry.marked_stale = true;
        }
    }

    /// Start a recurring background refresh for `key`.
    ///
    /// Each tick marks the entry stale and refreshes it without ever
    /// blocking the currently cached value. A second watch on the same key
    /// replaces the first. Handles are cancelled by [`TeardownHook`] when
    /// the session is torn down.
    pub fn watch<L, Fut>(&self, key: &str, every: Duration, loader: L)
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        let cache = self.clone();
        let watched_key = key.to_string();
        let ttl = self.config.default_ttl;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick fires immediately; skip it so the cadence
            // starts one period from now.
            interval.tick().await;
            loop {
                interval.tick().await;
                cache.mark_stale(&watched_key);
                cache.metrics.record_background_refresh();
                if let Err(e) =
                    cache.load_coalesced(watched_key.clone(), ttl, &loader).await
                {
                    warn!(key = %watched_key, error = %e, "background refresh failed");
                }
            }
        });

        let mut watches = self.watches.lock().expect("watch map lock");
        if let Some(previous) = watches.insert(key.to_string(), handle) {
            previous.abort();
        }
    }

    /// Stop the recurring refresh for `key`.
    pub fn unwatch(&self, key: &str) {
        if let Some(handle) = self.watches.lock().expect("watch map lock").remove(key) {
            handle.abort();
        }
    }

    /// Number of active watch intervals.
    pub fn watch_count(&self) -> usize {
        self.watches.lock().expect("watch map lock").len()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    fn spawn_revalidation<L, Fut>(&self, key: String, ttl: Duration, loader: L)
    where
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.metrics.record_background_refresh();
            if let Err(e) = cache.load_coalesced(key.clone(), ttl, &loader).await {
                warn!(key, error = %e, "revalidation failed, stale entry retained");
            }
        });
    }

    /// Run the loader through the per-key single-flight and store the
    /// result. Concurrent callers for the same key share one execution.
    async fn load_coalesced<L, Fut>(
        &self,
        key: String,
        ttl: Duration,
        loader: L,
    ) -> Result<V, TransportError>
    where
        L: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        let cache = self.clone();
        let flight_key = key.clone();
        let load = loader();
        self.flights
            .run(key, move || async move {
                let result = load.await;
                if let Ok(value) = &result {
                    cache.store(&flight_key, value.clone(), ttl);
                }
                result
            })
            .await
    }

    fn store(&self, key: &str, value: V, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.write().expect("cache map lock");

        if !entries.contains_key(key) && entries.len() >= self.config.capacity {
            // Bounded-size policy: evict the oldest insertion, not LRU.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_seq)
                .map(|(k, _)| k.clone())
            {
                debug!(evicted = %oldest, "capacity reached, evicting oldest entry");
                entries.remove(&oldest);
                self.metrics.record_eviction();
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                ttl,
                inserted_seq: self.insert_seq.fetch_add(1, Ordering::Relaxed),
                marked_stale: false,
            },
        );
    }
}

impl<V, C: Clock> TeardownHook for QueryCache<V, C>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cancel every watch interval and drop all cached entries.
    fn teardown(&self) {
        let mut watches = self.watches.lock().expect("watch map lock");
        for (_, handle) in watches.drain() {
            handle.abort();
        }
        drop(watches);
        self.entries.write().expect("cache map lock").clear();
        debug!("cache torn down");
    }
}
