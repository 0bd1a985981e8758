use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use tracing::error;

lazy_static! {
    /// Stands in for a stored hash when the account does not exist, so the
    /// sign-in path still runs one full verification.
    static ref DUMMY_HASH: Option<String> = hash_password("dummy-password-never-matches").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "password hashing failed");
            anyhow!("hash password: {e}")
        })
}

/// `Ok(false)` for a wrong password; `Err` only when the stored hash is
/// unreadable.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "stored password hash is malformed");
        anyhow!("parse password hash: {e}")
    })?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("verify password: {e}")),
    }
}

/// Verifies against a fixed hash and discards the outcome.
pub fn verify_against_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_hash_gets_its_own_salt() {
        let a = hash_password("same input").unwrap();
        let b = hash_password("same input").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("same input", &a).unwrap());
        assert!(verify_password("same input", &b).unwrap());
    }

    #[test]
    fn wrong_password_is_false_not_an_error() {
        let hash = hash_password("right").unwrap();
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn unreadable_hash_is_an_error() {
        assert!(verify_password("anything", "plaintext-in-db").is_err());
    }

    #[test]
    fn dummy_hash_never_accepts_real_input() {
        let hash = DUMMY_HASH.as_deref().expect("dummy hash");
        assert!(!verify_password("password123", hash).unwrap());
        verify_against_dummy("password123");
    }
}
