//! Request pipeline stages.
//!
//! Outermost first: [`recover_panic`] → [`log_request`] → [`secure_headers`]
//! → [`authenticate`] → [`require_permission`] / [`require_activated`] → handler.

use std::any::Any;
use std::fmt::Display;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::Instrument;

use keel_auth::{CallerIdentity, Permission, TokenVerifier};
use keel_core::Repository;

use crate::app::errors::{ApiError, SERVER_ERROR_MESSAGE, json_error};
use crate::context::Caller;

/// What the authentication and authorization stages need: the token verifier
/// and the store callers are resolved from.
pub struct AuthState<U> {
    pub verifier: Arc<TokenVerifier>,
    pub users: Arc<dyn Repository<U>>,
}

impl<U> AuthState<U> {
    pub fn new(verifier: Arc<TokenVerifier>, users: Arc<dyn Repository<U>>) -> Self {
        Self { verifier, users }
    }

    /// Guard state for a route requiring `permission`.
    pub fn require(&self, permission: Permission) -> PermissionGuard<U> {
        PermissionGuard {
            users: Arc::clone(&self.users),
            permission,
        }
    }
}

impl<U> Clone for AuthState<U> {
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
            users: Arc::clone(&self.users),
        }
    }
}

/// State of one [`require_permission`] layer.
pub struct PermissionGuard<U> {
    users: Arc<dyn Repository<U>>,
    permission: Permission,
}

impl<U> Clone for PermissionGuard<U> {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            permission: self.permission.clone(),
        }
    }
}

/// Resolve the caller from the bearer token and attach it as [`Caller<U>`].
///
/// Every response passing through here carries `Vary: Authorization`.
pub async fn authenticate<U>(State(state): State<AuthState<U>>, mut req: Request, next: Next) -> Response
where
    U: CallerIdentity,
    U::Key: FromStr,
    <U::Key as FromStr>::Err: Display,
{
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let outcome = keel_auth::authenticate::<U, dyn Repository<U>>(
        authorization,
        &state.verifier,
        &*state.users,
    )
    .await;

    let mut response = match outcome {
        Ok(caller) => {
            req.extensions_mut().insert(Caller::new(caller));
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("authorization"));
    response
}

/// Re-fetch the caller and require the guard's permission.
///
/// The fresh copy replaces the request's [`Caller<U>`] so handlers never see
/// a stale snapshot.
pub async fn require_permission<U>(
    State(guard): State<PermissionGuard<U>>,
    mut req: Request,
    next: Next,
) -> Response
where
    U: CallerIdentity,
{
    let Some(key) = req.extensions().get::<Caller<U>>().map(|c| c.key().clone()) else {
        return ApiError::server("authorization stage ran before authentication").into_response();
    };

    match keel_auth::authorize_fresh::<U, dyn Repository<U>>(&key, &guard.permission, &*guard.users)
        .await
    {
        Ok(fresh) => {
            req.extensions_mut().insert(Caller::new(fresh));
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Reject callers whose account is not activated.
pub async fn require_activated<U>(req: Request, next: Next) -> Response
where
    U: CallerIdentity,
{
    let Some(caller) = req.extensions().get::<Caller<U>>() else {
        return ApiError::server("activation check ran before authentication").into_response();
    };

    match keel_auth::require_activated(caller.user()) {
        Ok(()) => next.run(req).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Turn a panic anywhere below into a 500 that closes the connection.
pub async fn recover_panic(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let remote_addr = remote_addr(&req);

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!(
                %method,
                %uri,
                %remote_addr,
                panic = %panic_message(panic.as_ref()),
                "request handler panicked"
            );
            let mut response = json_error(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                SERVER_ERROR_MESSAGE,
            );
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
        }
    }
}

pub async fn secure_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    response
}

/// Open the per-request span and log one line per request.
pub async fn log_request(req: Request, next: Next) -> Response {
    let remote_addr = remote_addr(&req);

    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        protocol = ?req.version(),
        remote_addr = %remote_addr,
    );

    async move {
        let started = Instant::now();
        let response = next.run(req).await;
        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        response
    }
    .instrument(span)
    .await
}

/// Peer address recorded by the server, or `"unknown"` outside it.
fn remote_addr(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
