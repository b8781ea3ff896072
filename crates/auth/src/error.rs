use thiserror::Error;

use crate::Permission;

/// Terminal outcome of the authentication/authorization pipeline.
///
/// The messages are safe to show to clients except for `Internal`, whose text
/// is for logs only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Any credential defect: missing/malformed header, bad signature, expired,
    /// wrong issuer or audience, or a subject that no longer resolves.
    #[error("invalid or missing authentication token")]
    InvalidToken,

    /// Valid credential without the required capability.
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(Permission),

    /// Valid credential for an account that is not activated.
    #[error("user account is not activated")]
    InactiveAccount,

    /// Internal inconsistency (unparseable subject, storage failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
