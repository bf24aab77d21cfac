//! The session guard.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use carelink_common::resilience::{retry_with, Clock, ConfigError, RetryConfig, SystemClock};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::error::SessionError;
use super::provider::{AuthenticatedSession, IdentityProvider, LoginOutcome, MfaChallenge};
use super::types::{Credentials, SessionState, TokenSet, UserProfile};
use crate::http::{TokenSource, TransportError};
use crate::store::{SecureStore, StorageScope};
use crate::teardown::TeardownHook;

const TOKENS_KEY: &str = "session.tokens";
const PROFILE_KEY: &str = "session.profile";
const MFA_CODE_LEN: usize = 6;

/// Configuration for [`SessionGuard`].
#[derive(Debug, Clone)]
pub struct SessionGuardConfig {
    /// Consecutive authentication failures before lockout.
    pub max_login_attempts: u32,
    /// First lockout window; doubles on every repeated lockout.
    pub lockout_base: Duration,
    /// How long a second-factor challenge stays valid.
    pub mfa_code_ttl: Duration,
    /// Inactivity before Active degrades to Idle.
    pub idle_timeout: Duration,
    /// Inactivity before the session expires outright.
    pub hard_timeout: Duration,
    /// Rotate tokens this far ahead of their expiry.
    pub rotation_lead: Duration,
    /// Cadence of the rotation check.
    pub rotation_check: Duration,
    /// Retry budget for a single rotation; exhausting it expires the session.
    pub rotation_retry: RetryConfig,
}

impl Default for SessionGuardConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            lockout_base: Duration::from_secs(30),
            mfa_code_ttl: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(15 * 60),
            hard_timeout: Duration::from_secs(30 * 60),
            rotation_lead: Duration::from_secs(2 * 60),
            rotation_check: Duration::from_secs(30),
            rotation_retry: RetryConfig::default(),
        }
    }
}

impl SessionGuardConfig {
    pub fn builder() -> SessionGuardConfigBuilder {
        SessionGuardConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_login_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_login_attempts must be greater than 0".to_string(),
            });
        }
        if self.lockout_base.is_zero() {
            return Err(ConfigError::Invalid {
                message: "lockout_base must be greater than zero".to_string(),
            });
        }
        if self.idle_timeout >= self.hard_timeout {
            return Err(ConfigError::Invalid {
                message: "idle_timeout must be shorter than hard_timeout".to_string(),
            });
        }
        self.rotation_retry
            .validate::<std::convert::Infallible>()
            .map_err(|e| ConfigError::Invalid { message: e.to_string() })
    }
}

/// Builder for [`SessionGuardConfig`].
#[derive(Debug, Default)]
pub struct SessionGuardConfigBuilder {
    config: SessionGuardConfig,
}

impl SessionGuardConfigBuilder {
    pub fn new() -> Self {
        Self { config: SessionGuardConfig::default() }
    }

    pub fn max_login_attempts(mut self, attempts: u32) -> Self {
        self.config.max_login_attempts = attempts;
        self
    }

    pub fn lockout_base(mut self, base: Duration) -> Self {
        self.config.lockout_base = base;
        self
    }

    pub fn mfa_code_ttl(mut self, ttl: Duration) -> Self {
        self.config.mfa_code_ttl = ttl;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn hard_timeout(mut self, timeout: Duration) -> Self {
        self.config.hard_timeout = timeout;
        self
    }

    pub fn rotation_lead(mut self, lead: Duration) -> Self {
        self.config.rotation_lead = lead;
        self
    }

    pub fn rotation_check(mut self, check: Duration) -> Self {
        self.config.rotation_check = check;
        self
    }

    pub fn rotation_retry(mut self, retry: RetryConfig) -> Self {
        self.config.rotation_retry = retry;
        self
    }

    pub fn build(self) -> Result<SessionGuardConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    challenge: Option<MfaChallenge>,
    profile: Option<UserProfile>,
    last_activity_at: Option<Instant>,
    login_attempts: u32,
    lockout_until: Option<Instant>,
    lockout_streak: u32,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Anonymous,
            challenge: None,
            profile: None,
            last_activity_at: None,
            login_attempts: 0,
            lockout_until: None,
            lockout_streak: 0,
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "session transition");
            self.state = to;
        }
    }
}

/// Orchestrates login, second factor, idle and hard expiry, progressive
/// lockout and proactive token rotation.
///
/// Clones share the same session. The guard implements [`TokenSource`] so
/// the application-facing HTTP client can pull bearer tokens from it and
/// drive the single-flighted 401 refresh.
pub struct SessionGuard<C: Clock = SystemClock> {
    config: SessionGuardConfig,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SecureStore>,
    inner: Arc<Mutex<SessionInner>>,
    hooks: Arc<Mutex<Vec<Arc<dyn TeardownHook>>>>,
    rotation: Arc<Mutex<Option<JoinHandle<()>>>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for SessionGuard<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            inner: Arc::clone(&self.inner),
            hooks: Arc::clone(&self.hooks),
            rotation: Arc::clone(&self.rotation),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> std::fmt::Debug for SessionGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard").field("state", &self.state()).finish()
    }
}

impl SessionGuard<SystemClock> {
    /// Create a guard using the system clock.
    pub fn new(
        config: SessionGuardConfig,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SecureStore>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, provider, store, SystemClock)
    }
}

impl<C: Clock> SessionGuard<C> {
    /// Create a guard with a custom clock driving every timer.
    pub fn with_clock(
        config: SessionGuardConfig,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SecureStore>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            store,
            inner: Arc::new(Mutex::new(SessionInner::new())),
            hooks: Arc::new(Mutex::new(Vec::new())),
            rotation: Arc::new(Mutex::new(None)),
            clock: Arc::new(clock),
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("session lock").state
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.inner.lock().expect("session lock").profile.clone()
    }

    /// Login attempts left before lockout.
    pub fn remaining_attempts(&self) -> u32 {
        let inner = self.inner.lock().expect("session lock");
        self.config.max_login_attempts.saturating_sub(inner.login_attempts)
    }

    /// Remaining lockout window, if locked.
    pub fn lockout_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("session lock");
        let until = inner.lockout_until?;
        let remaining = until.saturating_duration_since(self.clock.now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Register cleanup run on every teardown to Anonymous.
    pub fn register_teardown_hook(&self, hook: Arc<dyn TeardownHook>) {
        self.hooks.lock().expect("hook lock").push(hook);
    }

    /// Attempt a login. Resolves to [`SessionState::Active`] directly or to
    /// [`SessionState::MfaPending`] when the provider demands a second
    /// factor.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: Credentials) -> Result<SessionState, SessionError> {
        {
            let mut inner = self.inner.lock().expect("session lock");
            let now = self.clock.now();

            if let Some(until) = inner.lockout_until {
                let remaining = until.saturating_duration_since(now);
                if !remaining.is_zero() {
                    return Err(SessionError::AccountLocked { retry_after: remaining });
                }
                // Window elapsed: the attempt counter resets.
                inner.lockout_until = None;
                inner.login_attempts = 0;
                if inner.state == SessionState::Locked {
                    inner.transition(SessionState::Anonymous);
                }
            }

            if inner.state != SessionState::Anonymous {
                return Err(SessionError::InvalidTransition {
                    state: inner.state,
                    operation: "login",
                });
            }
            inner.transition(SessionState::Authenticating);
        }

        match self.provider.authenticate(&credentials).await {
            Ok(LoginOutcome::MfaRequired(challenge)) => {
                let mut inner = self.inner.lock().expect("session lock");
                inner.challenge = Some(challenge);
                inner.transition(SessionState::MfaPending);
                Ok(SessionState::MfaPending)
            }
            Ok(LoginOutcome::Authenticated(session)) => {
                self.establish(session).await?;
                Ok(SessionState::Active)
            }
            Err(e) => {
                self.record_auth_failure(&e, SessionState::Anonymous)?;
                Err(SessionError::Transport(e))
            }
        }
    }

    /// Verify the pending second-factor code.
    ///
    /// Format and challenge expiry are checked client-side first, so a stale
    /// or malformed code fails without a network round-trip.
    #[instrument(skip(self, code))]
    pub async fn verify_mfa(&self, code: &str) -> Result<SessionState, SessionError> {
        let challenge = {
            let mut inner = self.inner.lock().expect("session lock");
            if inner.state != SessionState::MfaPending {
                return Err(SessionError::InvalidTransition {
                    state: inner.state,
                    operation: "verify_mfa",
                });
            }

            if code.len() != MFA_CODE_LEN || !code.chars().all(|c| c.is_ascii_digit()) {
                return Err(SessionError::InvalidMfaCode {
                    reason: format!("code must be {MFA_CODE_LEN} digits"),
                });
            }

            let challenge = inner.challenge.clone().ok_or(SessionError::InvalidTransition {
                state: inner.state,
                operation: "verify_mfa",
            })?;

            let now: DateTime<Utc> = self.clock.system_time().into();
            let age = (now - challenge.issued_at).to_std().unwrap_or(Duration::ZERO);
            if age >= self.config.mfa_code_ttl {
                inner.challenge = None;
                inner.transition(SessionState::Anonymous);
                return Err(SessionError::MfaExpired);
            }
            challenge
        };

        match self.provider.verify_second_factor(&challenge.challenge_id, code).await {
            Ok(session) => {
                self.establish(session).await?;
                Ok(SessionState::Active)
            }
            Err(e) => {
                self.record_auth_failure(&e, SessionState::MfaPending)?;
                Err(SessionError::Transport(e))
            }
        }
    }

    /// A pointer/keyboard interaction observed by the host. Returns the
    /// session to Active when it was Idle.
    pub fn record_activity(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        match inner.state {
            SessionState::Active => {}
            SessionState::Idle => inner.transition(SessionState::Active),
            _ => return,
        }
        inner.last_activity_at = Some(self.clock.now());
    }

    /// Evaluate idle and hard-expiry timers.
    ///
    /// Called by the host on a wall-clock interval rather than on event
    /// receipt, so detection stays robust in throttled environments.
    pub fn tick(&self) -> SessionState {
        let mut inner = self.inner.lock().expect("session lock");
        if !matches!(inner.state, SessionState::Active | SessionState::Idle) {
            return inner.state;
        }

        let Some(last_activity) = inner.last_activity_at else {
            return inner.state;
        };
        let inactive = self.clock.now().saturating_duration_since(last_activity);

        if inactive >= self.config.hard_timeout {
            warn!(inactive_secs = inactive.as_secs(), "hard timeout reached, expiring session");
            inner.transition(SessionState::Expired);
            drop(inner);
            self.abort_rotation();
            return SessionState::Expired;
        }
        if inner.state == SessionState::Active && inactive >= self.config.idle_timeout {
            inner.transition(SessionState::Idle);
        }
        inner.state
    }

    /// Tear the session down to Anonymous: clear session-scoped storage
    /// (overwrite-then-delete), cancel watch intervals via the registered
    /// hooks, stop rotation and drop in-memory session data.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.abort_rotation();
        self.store.clear_all(StorageScope::Session).await?;

        let hooks: Vec<Arc<dyn TeardownHook>> =
            self.hooks.lock().expect("hook lock").clone();
        for hook in hooks {
            hook.teardown();
        }

        let mut inner = self.inner.lock().expect("session lock");
        inner.challenge = None;
        inner.profile = None;
        inner.last_activity_at = None;
        inner.transition(SessionState::Anonymous);
        Ok(())
    }

    async fn establish(&self, session: AuthenticatedSession) -> Result<(), SessionError> {
        let stored = async {
            self.store.put(TOKENS_KEY, &session.tokens, StorageScope::Session, true).await?;
            self.store.put(PROFILE_KEY, &session.profile, StorageScope::Session, false).await?;
            Ok::<(), SessionError>(())
        }
        .await;

        if let Err(e) = stored {
            let mut inner = self.inner.lock().expect("session lock");
            inner.transition(SessionState::Anonymous);
            return Err(e);
        }

        {
            let mut inner = self.inner.lock().expect("session lock");
            inner.profile = Some(session.profile);
            inner.challenge = None;
            inner.login_attempts = 0;
            inner.lockout_streak = 0;
            inner.lockout_until = None;
            inner.last_activity_at = Some(self.clock.now());
            inner.transition(SessionState::Active);
        }

        self.start_rotation();
        Ok(())
    }

    /// Count an authentication failure; at the threshold, lock with a
    /// window that doubles across repeated lockouts.
    ///
    /// Only credential rejections count. A backend outage, timeout or open
    /// breaker is not evidence against the caller and must never lock the
    /// account.
    fn record_auth_failure(
        &self,
        error: &TransportError,
        fallback: SessionState,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session lock");
        if !error.is_rejection() {
            inner.transition(fallback);
            return Ok(());
        }
        inner.login_attempts += 1;

        if inner.login_attempts >= self.config.max_login_attempts {
            inner.lockout_streak += 1;
            let window = self.config.lockout_base * 2u32.saturating_pow(inner.lockout_streak - 1);
            inner.lockout_until = Some(self.clock.now() + window);
            inner.challenge = None;
            inner.transition(SessionState::Locked);
            warn!(
                attempts = inner.login_attempts,
                streak = inner.lockout_streak,
                window_secs = window.as_secs(),
                "account locked"
            );
            return Err(SessionError::MaxAttemptsExceeded { attempts: inner.login_attempts });
        }

        inner.transition(fallback);
        Ok(())
    }

    /// (Re)start the proactive rotation task. Scheduled ahead of expiry
    /// rather than reacting to 401s, so rotation never produces a burst of
    /// failed requests.
    fn start_rotation(&self) {
        let guard = self.clone();
        let handle = tokio::spawn(async move {
            // The timer only wakes the task; whether a check is due is
            // decided against the clock, so the cadence stays testable.
            let poll = (guard.config.rotation_check / 10).max(Duration::from_millis(1));
            let mut next_check = guard.clock.now() + guard.config.rotation_check;
            loop {
                tokio::time::sleep(poll).await;
                if !guard.state().is_authenticated() {
                    break;
                }
                let now = guard.clock.now();
                if now < next_check {
                    continue;
                }
                next_check = now + guard.config.rotation_check;

                let tokens: Option<TokenSet> = match guard
                    .store
                    .get(TOKENS_KEY, StorageScope::Session)
                    .await
                {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!(error = %e, "rotation could not read tokens");
                        continue;
                    }
                };
                let Some(tokens) = tokens else { continue };

                let now: DateTime<Utc> = guard.clock.system_time().into();
                if !tokens.expires_within(now, guard.config.rotation_lead) {
                    continue;
                }

                debug!("rotating tokens ahead of expiry");
                if guard.rotate_once(&tokens.refresh_token).await.is_err() {
                    warn!("rotation retry budget exhausted, expiring session");
                    let mut inner = guard.inner.lock().expect("session lock");
                    inner.transition(SessionState::Expired);
                    break;
                }
            }
        });

        let mut rotation = self.rotation.lock().expect("rotation lock");
        if let Some(previous) = rotation.replace(handle) {
            previous.abort();
        }
    }

    async fn rotate_once(&self, refresh_token: &str) -> Result<(), SessionError> {
        let provider = Arc::clone(&self.provider);
        let refresh_token = refresh_token.to_string();
        let fresh = retry_with(&self.config.rotation_retry, move || {
            let provider = Arc::clone(&provider);
            let refresh_token = refresh_token.clone();
            async move { provider.refresh_tokens(&refresh_token).await }
        })
        .await
        .map_err(|e| SessionError::Transport(TransportError::Authentication {
            message: format!("token rotation failed: {e}"),
            correlation_id: uuid::Uuid::new_v4(),
        }))?;

        self.store.put(TOKENS_KEY, &fresh, StorageScope::Session, true).await?;
        Ok(())
    }

    fn abort_rotation(&self) {
        if let Some(handle) = self.rotation.lock().expect("rotation lock").take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<C: Clock> TokenSource for SessionGuard<C> {
    async fn access_token(&self) -> Option<Zeroizing<String>> {
        if !self.state().is_authenticated() {
            return None;
        }
        let tokens: TokenSet =
            self.store.get(TOKENS_KEY, StorageScope::Session).await.ok().flatten()?;
        Some(Zeroizing::new(tokens.access_token))
    }

    async fn refresh_tokens(&self) -> Result<(), TransportError> {
        let failure = |message: String| TransportError::Authentication {
            message,
            correlation_id: uuid::Uuid::new_v4(),
        };

        let tokens: Option<TokenSet> = self
            .store
            .get(TOKENS_KEY, StorageScope::Session)
            .await
            .map_err(|e| failure(format!("cannot read session tokens: {e}")))?;
        let Some(tokens) = tokens else {
            return Err(failure("no session tokens to refresh".to_string()));
        };

        match self.provider.refresh_tokens(&tokens.refresh_token).await {
            Ok(fresh) => {
                self.store
                    .put(TOKENS_KEY, &fresh, StorageScope::Session, true)
                    .await
                    .map_err(|e| failure(format!("cannot persist rotated tokens: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // A failed refresh is unrecoverable; the session is torn
                // down before the error reaches the waiters.
                warn!(error = %e, "token refresh failed, tearing session down");
                if let Err(teardown) = self.logout().await {
                    warn!(error = %teardown, "teardown after failed refresh also failed");
                }
                Err(e)
            }
        }
    }
}
