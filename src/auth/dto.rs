use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::User;
use crate::schema::{registry, Schema, Validated};

/// Request body for sign-up.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Validated for SignUpRequest {
    fn schema() -> &'static Schema {
        &registry::SIGN_UP
    }
}

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

impl Validated for SignInRequest {
    fn schema() -> &'static Schema {
        &registry::SIGN_IN
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub token: String,
}

impl Validated for VerifyEmailRequest {
    fn schema() -> &'static Schema {
        &registry::VERIFY_EMAIL
    }
}

#[derive(Debug, Deserialize)]
pub struct SendVerificationRequest {
    pub email: String,
}

impl Validated for SendVerificationRequest {
    fn schema() -> &'static Schema {
        &registry::SEND_VERIFICATION
    }
}

/// Public view of a user.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            email_verified: u.email_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user: PublicUser,
    /// Only present when the server is configured to expose it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct CurrentSession {
    pub session_id: Uuid,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct VerificationSent {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
}
