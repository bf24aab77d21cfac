//! Session lifecycle management.
//!
//! The [`SessionGuard`] owns every session state transition: login, second
//! factor, idle and hard expiry, progressive lockout, and proactive token
//! rotation. Tokens are persisted encrypted in the session-scoped store and
//! exist in plaintext only transiently while a header is attached.

mod error;
mod guard;
mod provider;
mod types;

pub use error::SessionError;
pub use guard::{SessionGuard, SessionGuardConfig};
pub use provider::{
    AuthenticatedSession, HttpIdentityProvider, IdentityProvider, LoginOutcome, MfaChallenge,
};
pub use types::{Credentials, SessionState, TokenSet, UserProfile};
