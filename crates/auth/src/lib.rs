//! `keel-auth`: authentication and authorization decisions.
//!
//! This crate is decoupled from HTTP: it turns an `Authorization` header value
//! into a resolved caller and checks capabilities against a fresh copy of that
//! caller. Storage is reached only through [`keel_core::Repository`].

pub mod authenticate;
pub mod authorize;
pub mod claims;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod token;
pub mod user;

pub use authenticate::{BEARER_SCHEME, authenticate, extract_bearer};
pub use authorize::{authorize, authorize_fresh, require_activated};
pub use claims::{Audience, TokenClaims};
pub use error::AuthError;
pub use identity::CallerIdentity;
pub use permissions::{Permission, Permissions};
pub use token::{TokenError, TokenRejection, TokenSettings, TokenVerifier};
pub use user::User;
