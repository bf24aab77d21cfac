//! Circuit breaker guarding calls to an unreliable backend.
//!
//! After a configurable number of consecutive failures the circuit opens and
//! every attempt fails immediately, without touching the network. The
//! cool-down is evaluated lazily on the next attempt (no background timer):
//! once it has elapsed the circuit moves to half-open and the outcome of the
//! single probe call decides whether it closes again or re-opens.
//!
//! Breaker state is process-lifetime only and lives on the constructed
//! breaker object; independent instances share nothing.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through normally.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One probe request is allowed through to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u64,
    /// Time to wait before allowing a half-open probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::Invalid {
                message: "cooldown must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub total_calls: u64,
    pub last_failure_at: Option<Instant>,
}

/// Circuit breaker with lazily evaluated cool-down.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    consecutive_failures: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    last_failure_at: Arc<RwLock<Option<Instant>>>,
    probe_in_flight: Arc<AtomicBool>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            consecutive_failures: Arc::clone(&self.consecutive_failures),
            total_calls: Arc::clone(&self.total_calls),
            last_failure_at: Arc::clone(&self.last_failure_at),
            probe_in_flight: Arc::clone(&self.probe_in_flight),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config is valid")
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            last_failure_at: Arc::new(RwLock::new(None)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(clock),
        })
    }

    /// Check whether a call may proceed, transitioning open → half-open once
    /// the cool-down has elapsed. Half-open admits exactly one probe; other
    /// callers are rejected until its outcome is recorded.
    pub fn can_execute(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let state = self.state();
        match state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !self.probe_in_flight.swap(true, Ordering::AcqRel),
            CircuitState::Open => {
                let last_failure = self.last_failure_at.read().ok().and_then(|guard| *guard);
                if let Some(failure_at) = last_failure {
                    let now = self.clock.now();
                    if now.duration_since(failure_at) >= self.config.cooldown
                        && !self.probe_in_flight.swap(true, Ordering::AcqRel)
                    {
                        if let Ok(mut state) = self.state.write() {
                            *state = CircuitState::HalfOpen;
                        }
                        debug!("circuit breaker half-open after cool-down");
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Remaining cool-down before a probe is allowed, if the circuit is open.
    pub fn retry_after(&self) -> Option<Duration> {
        if self.state() != CircuitState::Open {
            return None;
        }
        let failure_at = self.last_failure_at.read().ok().and_then(|guard| *guard)?;
        let elapsed = self.clock.now().duration_since(failure_at);
        Some(self.config.cooldown.saturating_sub(elapsed))
    }

    /// Record a successful call: resets the failure counter and closes the
    /// circuit from half-open.
    pub fn record_success(&self) {
        let state = self.state();
        self.consecutive_failures.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);

        if state == CircuitState::HalfOpen {
            if let Ok(mut guard) = self.state.write() {
                *guard = CircuitState::Closed;
            }
            info!("circuit breaker closed after successful probe");
        }
    }

    /// Record a failed call, opening the circuit at the threshold. A failure
    /// during the half-open probe re-opens immediately.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.probe_in_flight.store(false, Ordering::Release);
        let now = self.clock.now();

        if let Ok(mut last_failure) = self.last_failure_at.write() {
            *last_failure = Some(now);
        }

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    if let Ok(mut guard) = self.state.write() {
                        *guard = CircuitState::Open;
                    }
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                if let Ok(mut guard) = self.state.write() {
                    *guard = CircuitState::Open;
                }
                warn!("circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    /// Snapshot for monitoring.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            last_failure_at: self.last_failure_at.read().ok().and_then(|guard| *guard),
        }
    }

    /// Reset to closed with a clean failure counter.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        if let Ok(mut last_failure) = self.last_failure_at.write() {
            *last_failure = None;
        }
        if let Ok(mut guard) = self.state.write() {
            *guard = CircuitState::Closed;
        }
        info!("circuit breaker manually reset");
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker.
    use super::*;
    use crate::resilience::MockClock;

    fn breaker(threshold: u64, cooldown_secs: u64, clock: MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .cooldown(Duration::from_secs(cooldown_secs))
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock(config, clock).expect("valid breaker")
    }

    #[test]
    fn opens_after_threshold_failures() {
        let clock = MockClock::new();
        let b = breaker(5, 60, clock);

        for _ in 0..4 {
            b.record_failure();
            assert_eq!(b.state(), CircuitState::Closed);
        }
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
    }

    #[test]
    fn rejects_while_cooldown_pending() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock.clone());

        b.record_failure();
        assert!(!b.can_execute());

        clock.advance(Duration::from_secs(59));
        assert!(!b.can_execute());
        assert!(b.retry_after().unwrap() <= Duration::from_secs(1));
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock.clone());

        b.record_failure();
        clock.advance(Duration::from_secs(60));

        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.metrics().consecutive_failures, 0);
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock.clone());

        b.record_failure();
        clock.advance(Duration::from_secs(61));
        assert!(b.can_execute());

        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock.clone());

        b.record_failure();
        clock.advance(Duration::from_secs(60));

        // First caller takes the probe slot; the rest are rejected until
        // its outcome lands, including callers on clones.
        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(!b.can_execute());
        assert!(!b.clone().can_execute());

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());
    }

    #[test]
    fn failed_probe_frees_the_slot_for_the_next_cooldown() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock.clone());

        b.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(b.can_execute());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(60));
        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn success_resets_failure_counter() {
        let clock = MockClock::new();
        let b = breaker(5, 60, clock);

        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.metrics().consecutive_failures, 0);

        // Four more failures should not open the circuit after the reset.
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn rejects_zero_threshold() {
        let result = CircuitBreakerConfig::builder().failure_threshold(0).build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn clones_share_state() {
        let clock = MockClock::new();
        let b = breaker(1, 60, clock);
        let other = b.clone();

        b.record_failure();
        assert_eq!(other.state(), CircuitState::Open);
    }
}
