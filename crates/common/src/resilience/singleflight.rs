//! Request coalescing: at most one in-flight execution per key.
//!
//! The thundering-herd hazard in this layer looks the same everywhere it
//! appears: many consumers requesting the same cache key, or many requests
//! hitting a 401 and racing to refresh the same token. Both reduce to one
//! primitive: given a key and a factory, return the pending shared result if
//! one exists, otherwise create and register it, deregistering only once it
//! settles. All concurrent callers receive a clone of the same outcome.
//!
//! A caller that drops its future stops receiving the result but does not
//! abort the shared execution while other callers still await it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type SharedFlight<T> = Shared<BoxFuture<'static, T>>;

/// Keyed coalescing of concurrent identical operations.
pub struct Singleflight<K, T> {
    inflight: Mutex<HashMap<K, SharedFlight<T>>>,
}

impl<K, T> Default for Singleflight<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Singleflight<K, T> {
    pub fn new() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }
}

impl<K, T> Singleflight<K, T>
where
    K: Eq + Hash + Clone + Send,
    T: Clone + Send + Sync + 'static,
{
    /// Run `factory` under `key`, or join the execution already in flight.
    ///
    /// The factory is only invoked when no execution is pending for the key.
    /// The registration is removed once the execution settles, so a later
    /// call starts a fresh one.
    pub async fn run<F, Fut>(&self, key: K, factory: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().expect("singleflight map lock");
            if let Some(existing) = inflight.get(&key) {
                debug!("joining in-flight operation");
                existing.clone()
            } else {
                let flight = factory().boxed().shared();
                inflight.insert(key.clone(), flight.clone());
                flight
            }
        };

        let result = flight.clone().await;

        // Deregister only the flight we awaited: a new execution may already
        // have been registered under the same key by a later caller.
        let mut inflight = self.inflight.lock().expect("singleflight map lock");
        if let Some(current) = inflight.get(&key) {
            if current.ptr_eq(&flight) {
                inflight.remove(&key);
            }
        }

        result
    }

    /// Whether an execution is currently registered for `key`.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().expect("singleflight map lock").contains_key(key)
    }

    /// Number of pending executions.
    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().expect("singleflight map lock").len()
    }
}
