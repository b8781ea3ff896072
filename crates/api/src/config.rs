//! Service configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KEEL_ADDRESS` | `0.0.0.0:8080` |
//! | `KEEL_SERVICE_NAME` | `keel` (token audience) |
//! | `KEEL_AUTHORITY` | `keel-identity` (token issuer) |
//! | `KEEL_PUBLIC_KEY_PATH` | unset: fall back to `JWT_SECRET` (HS256) |
//! | `JWT_SECRET` | `dev-secret` |
//! | `KEEL_SHUTDOWN_GRACE_MS` | `5000` |
//! | `KEEL_DB_TIMEOUT_MS` | `3000` |
//! | `DATABASE_URL` | unset: in-memory storage |
//! | `KEEL_DB_MAX_CONNECTIONS` | `25` |
//! | `KEEL_DB_MAX_IDLE_MS` | `900000` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use keel_auth::{TokenError, TokenSettings, TokenVerifier};
use keel_infra::DatabaseConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("token verifier: {0}")]
    Token(#[from] TokenError),
}

/// Where token signatures are checked against.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// RS256 public key (PEM) of the identity service.
    PublicKeyFile(PathBuf),
    /// HS256 shared secret, for local development and tests.
    SharedSecret(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::PublicKeyFile(path) => f.debug_tuple("PublicKeyFile").field(path).finish(),
            KeySource::SharedSecret(_) => f.write_str("SharedSecret(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub address: SocketAddr,
    pub service_name: String,
    pub authority: String,
    pub key: KeySource,
    pub shutdown_grace: Duration,
    pub db_timeout: Duration,
    pub database: Option<DatabaseConfig>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let address = parse_or(&var, "KEEL_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let service_name = var("KEEL_SERVICE_NAME").unwrap_or_else(|| {
            tracing::warn!("KEEL_SERVICE_NAME not set; using \"keel\"");
            "keel".to_string()
        });

        let authority = var("KEEL_AUTHORITY").unwrap_or_else(|| {
            tracing::warn!("KEEL_AUTHORITY not set; using insecure dev issuer");
            "keel-identity".to_string()
        });

        let key = match var("KEEL_PUBLIC_KEY_PATH") {
            Some(path) => KeySource::PublicKeyFile(PathBuf::from(path)),
            None => KeySource::SharedSecret(var("JWT_SECRET").unwrap_or_else(|| {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                "dev-secret".to_string()
            })),
        };

        let shutdown_grace = millis_or(&var, "KEEL_SHUTDOWN_GRACE_MS", Duration::from_secs(5))?;
        let db_timeout = millis_or(&var, "KEEL_DB_TIMEOUT_MS", Duration::from_secs(3))?;

        let database = match var("DATABASE_URL") {
            Some(url) => {
                let mut db = DatabaseConfig::new(url);
                db.max_connections = parse_or(&var, "KEEL_DB_MAX_CONNECTIONS", db.max_connections)?;
                db.max_idle = millis_or(&var, "KEEL_DB_MAX_IDLE_MS", db.max_idle)?;
                db.connect_timeout = db_timeout;
                Some(db)
            }
            None => None,
        };

        Ok(Self {
            address,
            service_name,
            authority,
            key,
            shutdown_grace,
            db_timeout,
            database,
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            authority: self.authority.clone(),
            audience: self.service_name.clone(),
        }
    }

    /// Load the key material once; the verifier is shared by every request.
    pub fn token_verifier(&self) -> Result<TokenVerifier, ConfigError> {
        let settings = self.token_settings();
        let verifier = match &self.key {
            KeySource::PublicKeyFile(path) => TokenVerifier::rs256_from_file(path, &settings)?,
            KeySource::SharedSecret(secret) => TokenVerifier::hs256(secret.as_bytes(), &settings)?,
        };
        Ok(verifier)
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn millis_or(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(var, name, default_ms).map(Duration::from_millis)
}
