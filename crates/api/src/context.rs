use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use keel_auth::CallerIdentity;

use crate::app::errors::ApiError;

/// Authenticated caller for a request.
///
/// Inserted by the authentication stage and replaced with a fresh copy by the
/// authorization stage. Handlers extract it directly; a route reached without
/// the authentication stage answers with a server error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller<U>(pub U);

impl<U: CallerIdentity> Caller<U> {
    pub fn new(user: U) -> Self {
        Self(user)
    }

    pub fn key(&self) -> &U::Key {
        self.0.key()
    }

    pub fn user(&self) -> &U {
        &self.0
    }

    pub fn into_inner(self) -> U {
        self.0
    }
}

#[async_trait]
impl<U, S> FromRequestParts<S> for Caller<U>
where
    U: CallerIdentity,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller<U>>()
            .cloned()
            .ok_or_else(|| ApiError::server("handler reached without an authenticated caller"))
    }
}
