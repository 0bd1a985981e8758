use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
const MAX_SESSION_AGE_DAYS: i64 = 365 * 5;
const MAX_VERIFICATION_TTL_MINUTES: i64 = 60 * 24 * 30;
const MAX_PURGE_INTERVAL_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub session_ttl_hours: i64,
    pub session_max_age_days: i64,
    pub verification_ttl_minutes: i64,
    pub require_email_verification: bool,
    pub expose_verification_token: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Period of the expired session/verification sweep.
    pub purge_interval_secs: u64,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// `None` when no provider key is configured; `/ai` then answers 503.
    pub ai: Option<AiConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Every required variable is
    /// checked here so a misconfigured process fails before it binds a socket.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: parse_or(&get, "APP_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_or(&get, "APP_PORT", 8080)?,
            purge_interval_secs: bounded_or(
                &get,
                "PURGE_INTERVAL_SECS",
                600,
                MAX_PURGE_INTERVAL_SECS as i64,
            )? as u64,
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            acquire_timeout_secs: parse_or(&get, "DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
        };

        let secret = get("AUTH_SECRET").ok_or(ConfigError::Missing("AUTH_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "AUTH_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        let auth = AuthConfig {
            secret,
            issuer: get("AUTH_ISSUER").unwrap_or_else(|| "todo-api".into()),
            audience: get("AUTH_AUDIENCE").unwrap_or_else(|| "todo-api-users".into()),
            session_ttl_hours: bounded_or(
                &get,
                "SESSION_TTL_HOURS",
                24 * 7,
                MAX_SESSION_TTL_HOURS,
            )?,
            session_max_age_days: bounded_or(
                &get,
                "SESSION_MAX_AGE_DAYS",
                30,
                MAX_SESSION_AGE_DAYS,
            )?,
            verification_ttl_minutes: bounded_or(
                &get,
                "VERIFICATION_TTL_MINUTES",
                60,
                MAX_VERIFICATION_TTL_MINUTES,
            )?,
            require_email_verification: parse_or(&get, "AUTH_REQUIRE_EMAIL_VERIFICATION", false)?,
            expose_verification_token: parse_or(&get, "AUTH_EXPOSE_VERIFICATION_TOKEN", false)?,
        };

        let ai = get("OPENAI_API_KEY").map(|api_key| AiConfig {
            api_key,
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
        });

        Ok(Self {
            server,
            database,
            auth,
            ai,
        })
    }
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

/// Durations are added to the current time; the cap keeps that in range.
fn bounded_or<G>(
    get: &G,
    name: &'static str,
    default: i64,
    max: i64,
) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, name, default)?;
    if value <= 0 || value > max {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be between 1 and {max}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn loads_defaults_when_only_required_vars_are_set() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
        ]))
        .expect("config should load");

        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.auth.issuer, "todo-api");
        assert_eq!(cfg.auth.session_ttl_hours, 168);
        assert!(!cfg.auth.require_email_verification);
        assert!(cfg.ai.is_none());
        assert_eq!(cfg.server.addr(), "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.server.purge_interval_secs, 600);
    }

    #[test]
    fn oversized_ttls_are_rejected_at_startup() {
        for name in [
            "SESSION_TTL_HOURS",
            "SESSION_MAX_AGE_DAYS",
            "VERIFICATION_TTL_MINUTES",
            "PURGE_INTERVAL_SECS",
        ] {
            let err = AppConfig::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://localhost/app"),
                ("AUTH_SECRET", SECRET),
                (name, "100000000"),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { name: n, .. } if n == name),
                "{name} accepted"
            );
        }
    }

    #[test]
    fn listen_address_is_validated() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("APP_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "APP_PORT", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("APP_PORT", "70000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "APP_PORT", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("APP_HOST", "somewhere"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "APP_HOST", .. }));

        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("APP_HOST", "127.0.0.1"),
            ("APP_PORT", "3000"),
        ]))
        .unwrap();
        assert_eq!(cfg.server.addr(), "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn missing_database_url_fails() {
        let err = AppConfig::from_lookup(lookup(&[("AUTH_SECRET", SECRET)])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", "   "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("AUTH_SECRET"));
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AUTH_SECRET", .. }));
    }

    #[test]
    fn malformed_numbers_fail_instead_of_defaulting() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("SESSION_TTL_HOURS", "a week"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SESSION_TTL_HOURS", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("VERIFICATION_TTL_MINUTES", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "VERIFICATION_TTL_MINUTES", .. }));
    }

    #[test]
    fn ai_section_present_only_with_key() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("AUTH_SECRET", SECRET),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-test"),
        ]))
        .unwrap();
        let ai = cfg.ai.expect("ai config");
        assert_eq!(ai.model, "gpt-test");
        assert_eq!(ai.base_url, "https://api.openai.com/v1");
    }
}
