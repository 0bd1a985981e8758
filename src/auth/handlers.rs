use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};

use super::{
    dto::{
        CurrentSession, PublicUser, SendVerificationRequest, SessionResponse, SignInRequest,
        SignUpRequest, SignUpResponse, VerificationSent, VerifiedResponse, VerifyEmailRequest,
    },
    identity::{AuthUser, SESSION_COOKIE},
    jwt::{generate_session_token, generate_verification_token},
    password::{hash_password, verify_against_dummy, verify_password},
};
use crate::{
    db::{NewSession, NewUser, NewVerification},
    error::AppError,
    schema::{extract::Valid, ValidationError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/verify-email", post(verify_email))
        .route("/send-verification", post(send_verification))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/session", get(current_session))
}

/// `now + ttl`, failing the request instead of overflowing.
fn expiry_after(ttl: Duration) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::now_utc()
        .checked_add(ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("expiry {ttl} is out of range")))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn sign_up(
    State(state): State<AppState>,
    Valid(payload): Valid<SignUpRequest>,
) -> Result<(StatusCode, Json<SignUpResponse>), AppError> {
    let password_hash = hash_password(&payload.password)?;
    let token = generate_verification_token();
    let expires_at = expiry_after(Duration::minutes(state.config.auth.verification_ttl_minutes))?;

    let (user, verification) = state
        .store
        .insert_user_with_verification(
            NewUser {
                email: payload.email.clone(),
                name: payload.name,
                password_hash,
            },
            NewVerification {
                identifier: payload.email,
                value: token,
                expires_at,
            },
        )
        .await?;

    // No mail transport; delivery of the token is left to the operator.
    info!(
        user_id = %user.id,
        verification_id = %verification.id,
        "user registered, verification issued"
    );

    let verification_token = state
        .config
        .auth
        .expose_verification_token
        .then_some(verification.value);

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            user: user.into(),
            verification_token,
        }),
    ))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn verify_email(
    State(state): State<AppState>,
    Valid(payload): Valid<VerifyEmailRequest>,
) -> Result<Json<VerifiedResponse>, AppError> {
    let verified = state
        .store
        .consume_verification(&payload.email, &payload.token, OffsetDateTime::now_utc())
        .await?;

    match verified {
        Some(user_id) => {
            info!(%user_id, "email verified");
            Ok(Json(VerifiedResponse { verified: true }))
        }
        None => {
            warn!("verification token unknown, used or expired");
            Err(ValidationError::single("token", "is invalid or has expired").into())
        }
    }
}

/// Issues a fresh token for an unverified account, discarding older ones.
/// The answer is 202 whether or not the address belongs to an account.
#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn send_verification(
    State(state): State<AppState>,
    Valid(payload): Valid<SendVerificationRequest>,
) -> Result<(StatusCode, Json<VerificationSent>), AppError> {
    let mut verification_token = None;

    match state.store.find_user_by_email(&payload.email).await? {
        Some(user) if !user.email_verified => {
            let expires_at =
                expiry_after(Duration::minutes(state.config.auth.verification_ttl_minutes))?;
            let verification = state
                .store
                .replace_verification(
                    user.id,
                    NewVerification {
                        identifier: user.email,
                        value: generate_verification_token(),
                        expires_at,
                    },
                )
                .await?;
            info!(
                user_id = %user.id,
                verification_id = %verification.id,
                "verification reissued"
            );
            if state.config.auth.expose_verification_token {
                verification_token = Some(verification.value);
            }
        }
        Some(user) => debug!(user_id = %user.id, "address already verified"),
        None => debug!("no account for address"),
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(VerificationSent {
            accepted: true,
            verification_token,
        }),
    ))
}

fn session_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    ))
    .map_err(|e| AppError::Internal(e.into()))
}

fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    let ip = read("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty());
    (read(header::USER_AGENT.as_str()), ip)
}

#[instrument(skip(state, headers, payload), fields(email = %payload.email))]
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(payload): Valid<SignInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Some(user) = state.store.find_user_by_email(&payload.email).await? else {
        verify_against_dummy(&payload.password);
        warn!("sign-in for unknown email");
        return Err(AppError::Unauthenticated);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "sign-in with invalid password");
        return Err(AppError::Unauthenticated);
    }

    if state.config.auth.require_email_verification && !user.email_verified {
        return Err(AppError::Forbidden("email address is not verified"));
    }

    let (user_agent, ip_address) = client_meta(&headers);
    let session = state
        .store
        .insert_session(NewSession {
            user_id: user.id,
            token: generate_session_token(),
            expires_at: expiry_after(Duration::hours(state.config.auth.session_ttl_hours))?,
            user_agent,
            ip_address,
        })
        .await?;

    let token = state.keys.sign(user.id, &session.token)?;
    let cookie = session_cookie(&token, state.keys.max_age().as_secs() as i64)?;

    info!(user_id = %user.id, session_id = %session.id, "user signed in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            token,
            expires_at: session.expires_at,
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn sign_out(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete_session(identity.session_id).await?;
    info!(session_id = %identity.session_id, "user signed out");
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, session_cookie("", 0)?)],
    ))
}

#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn current_session(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<CurrentSession>, AppError> {
    let user = state
        .store
        .find_user(identity.user_id)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    Ok(Json(CurrentSession {
        session_id: identity.session_id,
        user: PublicUser::from(user),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_meta_takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        let (ua, ip) = client_meta(&headers);
        assert_eq!(ua.as_deref(), Some("curl/8"));
        assert_eq!(ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn expiry_overflow_is_an_error_not_a_panic() {
        let err = expiry_after(Duration::MAX).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(expiry_after(Duration::hours(1)).is_ok());
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let cookie = session_cookie("", 0).unwrap();
        let text = cookie.to_str().unwrap();
        assert!(text.starts_with("session_token=;"));
        assert!(text.contains("Max-Age=0"));
        assert!(text.contains("HttpOnly"));
    }
}
