//! Cache hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub background_refreshes: u64,
}

impl CacheStats {
    /// Hit ratio over all lookups, stale hits counted as hits.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits + self.stale_hits) as f64 / total as f64
    }
}

/// Lock-free counters shared by the cache and its background tasks.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    background_refreshes: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
        }
    }
}
