//! Session authentication.
//!
//! The hosted identity provider issues HS256 session tokens whose `sub` is
//! the user ID and whose `role` is `customer`, `provider` or `admin`. Tokens
//! arrive as `Authorization: Bearer <token>` or, for browser clients, in the
//! session cookie. Every handler that takes an [`Actor`] is rejected with
//! 401 before it runs when no valid token is present.
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn get_booking(actor: Actor, Path(id): Path<BookingId>) -> Result<Json<Booking>, AppError> {
//!     // actor.user_id and actor.role come from a verified token
//! }
//!
//! async fn fee_policy(RequireAdmin(admin): RequireAdmin) -> Result<Json<FeePolicy>, AppError> {
//!     // admin.role == Role::Admin
//! }
//! ```

use crate::server::AppState;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use marketplace_core::actor::{Actor, Role};
use marketplace_core::ids::UserId;
use marketplace_web::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Token verification failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token in the request
    #[error("missing session token")]
    MissingToken,

    /// Signature, expiry or issuer check failed
    #[error("invalid session token: {0}")]
    InvalidToken(String),

    /// Token verified but its claims are unusable
    #[error("invalid session claims: {0}")]
    InvalidClaims(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        tracing::debug!(error = %err, "Authentication failed");
        Self::unauthorized(err.to_string())
    }
}

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Role name
    pub role: String,
    /// Expiry (unix seconds)
    pub exp: u64,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies session tokens and resolves them to an [`Actor`]
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
    cookie_name: String,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.issuer)
            .field("cookie_name", &self.cookie_name)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier for an HS256 secret
    #[must_use]
    pub fn new(secret: &str, issuer: Option<String>, cookie_name: impl Into<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        if let Some(issuer) = &issuer {
            validation.set_issuer(&[issuer]);
            validation.set_required_spec_claims(&["exp", "iss"]);
        }
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            cookie_name: cookie_name.into(),
        }
    }

    /// Verify a token and resolve its actor.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for bad signatures, expired tokens, unknown
    /// roles and non-UUID subjects. The `system` role is never accepted.
    pub fn verify(&self, token: &str) -> Result<Actor, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|e| AuthError::InvalidClaims(format!("sub: {e}")))?;
        let role = data.claims.role.parse::<Role>().map_err(AuthError::InvalidClaims)?;
        Ok(Actor { user_id, role })
    }

    /// Issue a token for an actor, as the identity provider would.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if encoding fails.
    pub fn issue(&self, actor: &Actor, ttl: Duration) -> Result<String, AuthError> {
        let exp = u64::try_from(Utc::now().timestamp())
            .unwrap_or(0)
            .saturating_add(ttl.as_secs());
        let claims = Claims {
            sub: actor.user_id.to_string(),
            role: actor.role.as_str().to_string(),
            exp,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Find the session token in a request's headers
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] when neither a bearer token nor
    /// the session cookie is present.
    pub fn token_from_headers<'h>(&self, headers: &'h HeaderMap) -> Result<&'h str, AuthError> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let value = value.to_str().map_err(|_| AuthError::MissingToken)?;
            return value
                .strip_prefix("Bearer ")
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or(AuthError::MissingToken);
        }
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, token)| token)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(actor) = parts.extensions.get::<Self>() {
            return Ok(*actor);
        }
        let token = state.tokens.token_from_headers(&parts.headers)?;
        let actor = state.tokens.verify(token)?;
        tracing::Span::current().record("user_id", tracing::field::display(actor.user_id));
        parts.extensions.insert(actor);
        Ok(actor)
    }
}

/// Authenticated admin.
///
/// Rejects with 401 when unauthenticated and 403 for any other role.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let actor = Actor::from_request_parts(parts, state).await?;
        if actor.is_admin() {
            Ok(Self(actor))
        } else {
            Err(AppError::forbidden("admin role required"))
        }
    }
}
