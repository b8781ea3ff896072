//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: storage wiring (in-memory or Postgres repositories, tracker)
//! - `catalog.rs`: the demo `Item` entity and its permission codes
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower::ServiceBuilder;

use keel_auth::{TokenVerifier, User};

use crate::middleware::{self, AuthState};

pub mod catalog;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>, verifier: Arc<TokenVerifier>) -> Router {
    let auth = AuthState::new(verifier, Arc::clone(&services.users));

    // Protected routes: require a resolved caller.
    let protected = routes::router(&auth)
        .layer(Extension(services))
        .layer(from_fn_with_state(auth, middleware::authenticate::<User>));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(middleware::recover_panic))
                .layer(from_fn(middleware::log_request))
                .layer(from_fn(middleware::secure_headers)),
        )
}
