use axum::{Router, routing::get};

use keel_auth::User;

use crate::middleware::AuthState;

pub mod items;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router(auth: &AuthState<User>) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(items::router(auth))
}
