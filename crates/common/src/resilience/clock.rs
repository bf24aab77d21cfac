//! Time abstraction for deterministic testing.
//!
//! Breaker cool-downs, cache TTLs, idle windows, and lockout windows are all
//! wall-clock driven. Production code uses [`SystemClock`]; tests use
//! [`MockClock`] to advance time without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations.
pub trait Clock: Send + Sync + 'static {
    /// Current instant (monotonic time).
    fn now(&self) -> Instant;

    /// Current system time (wall clock).
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since UNIX epoch.
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Controllable clock for tests.
///
/// Clones share the same elapsed offset, so a test can hold one handle and
/// advance time for every component constructed from another clone.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by a duration without sleeping.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the clock by milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the elapsed time to an absolute value.
    pub fn set_elapsed(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed = duration;
        }
    }

    /// Current elapsed offset.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the clock abstraction.
    use super::*;

    #[test]
    fn mock_clock_advances_without_sleeping() {
        let clock = MockClock::new();
        let t0 = clock.now();

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now().duration_since(t0), Duration::from_secs(60));

        clock.advance_millis(500);
        assert_eq!(clock.now().duration_since(t0), Duration::from_millis(60_500));
    }

    #[test]
    fn mock_clock_clones_share_elapsed_time() {
        let clock = MockClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn set_elapsed_is_absolute() {
        let clock = MockClock::new();
        clock.advance(Duration::from_secs(100));
        clock.set_elapsed(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.millis_since_epoch() > 0);
    }
}
