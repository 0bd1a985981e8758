use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::jwt::SessionKeys;
use crate::{db::Store, error::AppError, state::AppState};

pub const SESSION_COOKIE: &str = "session_token";

/// The raw credential a client presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    /// `Authorization: Bearer <token>` wins over the session cookie.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let token = bearer.map(str::to_string).or_else(|| {
            headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|h| h.to_str().ok())
                .flat_map(|h| h.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
                .map(|(_, value)| value.to_string())
        })?;

        Some(Self { token })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub email_verified: bool,
}

impl Identity {
    pub fn require_verified(&self) -> Result<(), AppError> {
        if self.email_verified {
            Ok(())
        } else {
            Err(AppError::Forbidden("email address is not verified"))
        }
    }
}

/// Turns presented credentials into the identity behind them.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AppError>;
}

/// Resolves signed session tokens against the sessions table and slides
/// the idle expiry forward once less than half of it remains.
pub struct SessionResolver {
    store: Arc<dyn Store>,
    keys: SessionKeys,
    idle_ttl: Duration,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn Store>, keys: SessionKeys, idle_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            idle_ttl,
        }
    }
}

#[async_trait]
impl IdentityResolver for SessionResolver {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AppError> {
        let claims = self.keys.verify(&credentials.token).map_err(|e| {
            debug!(error = %e, "session token rejected");
            AppError::Unauthenticated
        })?;

        let session = self
            .store
            .find_session(&claims.sid)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        if session.user_id != claims.sub {
            warn!(session_id = %session.id, "session token subject mismatch");
            return Err(AppError::Unauthenticated);
        }

        let now = OffsetDateTime::now_utc();
        if session.expires_at <= now {
            self.store.delete_session(session.id).await?;
            debug!(session_id = %session.id, "expired session removed");
            return Err(AppError::Unauthenticated);
        }

        if session.expires_at - now < self.idle_ttl / 2 {
            // A failed refresh must not fail a request the session still covers.
            match now.checked_add(self.idle_ttl) {
                Some(extended) => match self.store.extend_session(session.id, extended).await {
                    Ok(_) => {
                        debug!(session_id = %session.id, expires_at = %extended, "session extended")
                    }
                    Err(e) => warn!(session_id = %session.id, error = %e, "session refresh failed"),
                },
                None => warn!(session_id = %session.id, "session idle ttl out of range"),
            }
        }

        Ok(Identity {
            user_id: session.user_id,
            session_id: session.id,
            email_verified: session.email_verified,
        })
    }
}

/// Extractor for handlers that require a signed-in user. Rejection happens
/// before any body is read, so an unauthenticated request never reaches
/// validation or the handler.
pub struct AuthUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials =
            Credentials::from_headers(&parts.headers).ok_or(AppError::Unauthenticated)?;
        let identity = state.identity.resolve(&credentials).await?;
        Ok(AuthUser(identity))
    }
}
