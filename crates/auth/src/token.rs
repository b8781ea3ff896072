//! Bearer token verification.
//!
//! The key is loaded once at startup. RS256 with the identity service's public
//! key is the production setup; HS256 with a shared secret exists for local
//! development and tests.

use std::path::Path;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use thiserror::Error;

use crate::TokenClaims;

/// Who may issue tokens, and under which name this service accepts them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    /// Expected `iss`.
    pub authority: String,
    /// This service's identifier, expected among `aud`.
    pub audience: String,
}

/// The verifier could not be built.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("cannot read public key {path}: {source}")]
    ReadKey {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Why a token was refused. Logged, never sent to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("malformed token")]
    Malformed,
    #[error("signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("unexpected issuer")]
    WrongIssuer,
    #[error("service is not an accepted audience")]
    WrongAudience,
    #[error("missing required claim '{0}'")]
    MissingClaim(String),
    #[error("token rejected: {0}")]
    Other(String),
}

/// Verifies signature, validity window, issuer and audience in one pass.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl core::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn rs256_from_pem(pem: &[u8], settings: &TokenSettings) -> Result<Self, TokenError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key, Algorithm::RS256, settings))
    }

    pub fn rs256_from_file(path: impl AsRef<Path>, settings: &TokenSettings) -> Result<Self, TokenError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| TokenError::ReadKey {
            path: path.display().to_string(),
            source,
        })?;
        Self::rs256_from_pem(&pem, settings)
    }

    pub fn hs256(secret: &[u8], settings: &TokenSettings) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::InvalidKey("secret must be non-empty".to_string()));
        }
        Ok(Self::new(DecodingKey::from_secret(secret), Algorithm::HS256, settings))
    }

    fn new(key: DecodingKey, algorithm: Algorithm, settings: &TokenSettings) -> Self {
        let mut validation = Validation::new(algorithm);
        // Expiry is exact: a token that ended a second ago is expired.
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[settings.authority.as_str()]);
        validation.set_audience(&[settings.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenRejection> {
        decode::<TokenClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| rejection(&e))
    }
}

fn rejection(error: &jsonwebtoken::errors::Error) -> TokenRejection {
    match error.kind() {
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
        ErrorKind::InvalidIssuer => TokenRejection::WrongIssuer,
        ErrorKind::InvalidAudience => TokenRejection::WrongAudience,
        ErrorKind::MissingRequiredClaim(claim) => TokenRejection::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => TokenRejection::Malformed,
        _ => TokenRejection::Other(error.to_string()),
    }
}
