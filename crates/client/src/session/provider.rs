//! Identity provider abstraction and its HTTP implementation.
//!
//! Three endpoints are consumed: authenticate, verify-second-factor and
//! refresh-tokens. The trait exists so the guard can be driven by a mock in
//! tests; the production implementation goes through the resilient client.

use std::sync::Arc;

use async_trait::async_trait;
use carelink_common::resilience::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Credentials, TokenSet, UserProfile};
use crate::http::{RequestOverrides, ResilientHttpClient, TransportError};

/// A pending second-factor challenge.
#[derive(Debug, Clone)]
pub struct MfaChallenge {
    pub challenge_id: String,
    pub issued_at: DateTime<Utc>,
    /// Masked destination shown to the user, e.g. "***-**-1234".
    pub delivery_hint: Option<String>,
}

/// Tokens plus profile returned by a completed authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub tokens: TokenSet,
    pub profile: UserProfile,
}

/// How an authenticate call resolved.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(AuthenticatedSession),
    MfaRequired(MfaChallenge),
}

/// The three identity-provider endpoints the guard consumes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginOutcome, TransportError>;

    async fn verify_second_factor(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<AuthenticatedSession, TransportError>;

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MfaVerifyRequest<'a> {
    challenge_id: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenSetDto {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    id_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl From<TokenSetDto> for TokenSet {
    fn from(dto: TokenSetDto) -> Self {
        TokenSet {
            access_token: dto.access_token,
            refresh_token: dto.refresh_token,
            id_token: dto.id_token,
            expires_at: dto.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDto {
    user_id: String,
    display_name: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<ProfileDto> for UserProfile {
    fn from(dto: ProfileDto) -> Self {
        UserProfile { user_id: dto.user_id, display_name: dto.display_name, email: dto.email }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponseDto {
    #[serde(default)]
    mfa_required: bool,
    #[serde(default)]
    challenge_id: Option<String>,
    #[serde(default)]
    delivery_hint: Option<String>,
    #[serde(default)]
    tokens: Option<TokenSetDto>,
    #[serde(default)]
    profile: Option<ProfileDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponseDto {
    tokens: TokenSetDto,
    profile: ProfileDto,
}

/// Identity provider over the resilient HTTP client.
///
/// The client used here carries no token source: identity calls are always
/// unauthenticated and must never recurse into a refresh.
pub struct HttpIdentityProvider<C: Clock> {
    http: Arc<ResilientHttpClient<C>>,
}

impl<C: Clock> HttpIdentityProvider<C> {
    pub fn new(http: Arc<ResilientHttpClient<C>>) -> Self {
        Self { http }
    }

    fn overrides() -> Option<RequestOverrides> {
        Some(RequestOverrides { skip_auth: true, ..RequestOverrides::default() })
    }

    fn decode_failure(message: impl Into<String>) -> TransportError {
        TransportError::Decode { message: message.into(), correlation_id: uuid::Uuid::new_v4() }
    }
}

#[async_trait]
impl<C: Clock> IdentityProvider for HttpIdentityProvider<C> {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginOutcome, TransportError> {
        let body = serde_json::json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let response = self
            .http
            .post::<LoginResponseDto>("/auth/login", body, Self::overrides())
            .await?;
        let dto = response.data;

        if dto.mfa_required {
            let challenge_id = dto
                .challenge_id
                .ok_or_else(|| Self::decode_failure("mfaRequired without challengeId"))?;
            debug!(challenge_id, "second factor demanded");
            return Ok(LoginOutcome::MfaRequired(MfaChallenge {
                challenge_id,
                issued_at: Utc::now(),
                delivery_hint: dto.delivery_hint,
            }));
        }

        let tokens =
            dto.tokens.ok_or_else(|| Self::decode_failure("login response without tokens"))?;
        let profile =
            dto.profile.ok_or_else(|| Self::decode_failure("login response without profile"))?;
        Ok(LoginOutcome::Authenticated(AuthenticatedSession {
            tokens: tokens.into(),
            profile: profile.into(),
        }))
    }

    async fn verify_second_factor(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<AuthenticatedSession, TransportError> {
        let body = serde_json::to_value(MfaVerifyRequest { challenge_id, code })
            .map_err(|e| Self::decode_failure(e.to_string()))?;
        let response = self
            .http
            .post::<SessionResponseDto>("/auth/mfa/verify", body, Self::overrides())
            .await?;
        Ok(AuthenticatedSession {
            tokens: response.data.tokens.into(),
            profile: response.data.profile.into(),
        })
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, TransportError> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| Self::decode_failure(e.to_string()))?;
        let response =
            self.http.post::<TokenSetDto>("/auth/refresh", body, Self::overrides()).await?;
        Ok(response.data.into())
    }
}
