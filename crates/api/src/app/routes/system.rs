use axum::{Json, http::StatusCode, response::IntoResponse};

use keel_auth::User;

use crate::app::errors::ApiError;
use crate::context::Caller;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(caller: Caller<User>) -> impl IntoResponse {
    let user = caller.user();
    Json(serde_json::json!({
        "id": user.id,
        "permissions": user.permissions,
        "activated": user.activated,
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
