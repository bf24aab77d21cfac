//! Session domain types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// The session state machine.
///
/// `Anonymous → Authenticating → MfaPending → Active → Idle → Expired/Locked
/// → Anonymous`. Transitions are owned entirely by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    MfaPending,
    Active,
    Idle,
    Expired,
    Locked,
}

impl SessionState {
    /// Whether requests may carry this session's bearer token.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticating => "authenticating",
            SessionState::MfaPending => "mfa-pending",
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Expired => "expired",
            SessionState::Locked => "locked",
        };
        write!(f, "{s}")
    }
}

/// Login credentials supplied by the host UI.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The token triplet issued by the identity provider.
///
/// Persisted only through the secure store, never in the clear.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the access token expires within `lead`.
    pub fn expires_within(&self, now: DateTime<Utc>, lead: std::time::Duration) -> bool {
        let lead = ChronoDuration::from_std(lead).unwrap_or(ChronoDuration::zero());
        now + lead >= self.expires_at
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Profile of the signed-in member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tokens_expiring_at(expires_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            id_token: None,
            expires_at,
        }
    }

    #[test]
    fn expiry_lead_window() {
        let now = Utc::now();
        let tokens = tokens_expiring_at(now + ChronoDuration::seconds(90));

        assert!(!tokens.is_expired(now));
        assert!(tokens.expires_within(now, Duration::from_secs(120)));
        assert!(!tokens.expires_within(now, Duration::from_secs(30)));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let tokens = tokens_expiring_at(Utc::now());
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn only_active_and_idle_are_authenticated() {
        assert!(SessionState::Active.is_authenticated());
        assert!(SessionState::Idle.is_authenticated());
        assert!(!SessionState::MfaPending.is_authenticated());
        assert!(!SessionState::Expired.is_authenticated());
    }
}
