use std::time::Duration;

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthConfig;

const SESSION_TOKEN_BYTES: usize = 32;
const VERIFICATION_TOKEN_BYTES: usize = 24;

/// Payload of the signed token handed to clients. `sid` is the opaque
/// session token stored server-side; the signature only proves we issued
/// it, the session row decides whether it is still valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,   // user ID
    pub sid: String, // session token
    pub iat: usize,  // issued at
    pub exp: usize,  // absolute expiry
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    max_age: Duration,
}

impl SessionKeys {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            max_age: Duration::from_secs(
                (cfg.session_max_age_days.max(0) as u64).saturating_mul(24 * 60 * 60),
            ),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn sign(&self, user_id: Uuid, sid: &str) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = i64::try_from(self.max_age.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(TimeDuration::seconds(secs)))
            .context("session max age is out of range")?;
        let claims = SessionClaims {
            sub: user_id,
            sid: sid.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(%user_id, "session token signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

pub fn generate_session_token() -> String {
    random_token(SESSION_TOKEN_BYTES)
}

pub fn generate_verification_token() -> String {
    random_token(VERIFICATION_TOKEN_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fake_config;

    fn keys_with(issuer: &str, audience: &str) -> SessionKeys {
        let mut cfg = fake_config().auth;
        cfg.issuer = issuer.into();
        cfg.audience = audience.into();
        SessionKeys::new(&cfg)
    }

    #[test]
    fn sign_and_verify() {
        let keys = keys_with("iss", "aud");
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id, "sid-123").expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, "sid-123");
        assert_eq!(claims.iss, "iss");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = keys_with("good-iss", "good-aud");
        let bad = keys_with("bad-iss", "bad-aud");
        let token = good.sign(Uuid::new_v4(), "sid").expect("sign");
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_tampered_token() {
        let keys = keys_with("iss", "aud");
        let mut token = keys.sign(Uuid::new_v4(), "sid").expect("sign");
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn oversized_max_age_fails_to_sign_instead_of_panicking() {
        let mut cfg = fake_config().auth;
        cfg.session_max_age_days = i64::MAX;
        let keys = SessionKeys::new(&cfg);
        assert!(keys.sign(Uuid::new_v4(), "sid").is_err());
    }

    #[test]
    fn random_tokens_are_url_safe_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(generate_verification_token().len(), 32);
    }
}
