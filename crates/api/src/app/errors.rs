use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use keel_auth::{AuthError, BEARER_SCHEME};
use keel_core::{RepositoryError, ValidationErrors};

pub const SERVER_ERROR_MESSAGE: &str =
    "The server encountered a problem and could not process your request";

/// Every failure a handler or middleware stage can end in.
///
/// Messages are the client-facing text; `ServerError` carries internal detail
/// that is logged and never sent.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("The requested resource could not be found")]
    NotFound,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("a record with this key already exists")]
    DuplicateKey,

    #[error("invalid or missing authentication token")]
    InvalidToken,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    Forbidden,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("{0}")]
    BadRequest(String),

    #[error("failed validation")]
    FailedValidation(ValidationErrors),

    #[error("The server encountered a problem and could not process your request")]
    ServerError(String),
}

impl ApiError {
    pub fn server(detail: impl Into<String>) -> Self {
        Self::ServerError(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::EditConflict | ApiError::DuplicateKey => StatusCode::CONFLICT,
            ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden | ApiError::InactiveAccount => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::ServerError(detail) => {
                // The request span carries method, uri and remote address.
                tracing::error!(error = %detail, "request failed");
                json_error(status, SERVER_ERROR_MESSAGE)
            }
            ApiError::FailedValidation(errors) => json_error(status, errors),
            ApiError::InvalidToken => {
                let mut response = json_error(status, ApiError::InvalidToken.to_string());
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(BEARER_SCHEME),
                );
                response
            }
            other => json_error(status, other.to_string()),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ApiError::NotFound,
            RepositoryError::EditConflict => ApiError::EditConflict,
            RepositoryError::DuplicateKey(_) => ApiError::DuplicateKey,
            other => ApiError::ServerError(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ApiError::InvalidToken,
            AuthError::Forbidden(permission) => {
                tracing::debug!(%permission, "caller lacks required permission");
                ApiError::Forbidden
            }
            AuthError::InactiveAccount => ApiError::InactiveAccount,
            AuthError::Internal(detail) => ApiError::ServerError(detail),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::FailedValidation(errors)
    }
}

/// `{"error": <message>}` with the given status.
pub fn json_error(status: StatusCode, message: impl Serialize) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn invalid_token_carries_bearer_challenge() {
        let response = ApiError::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(
            body_json(response).await["error"],
            "invalid or missing authentication token"
        );
    }

    #[tokio::test]
    async fn server_error_detail_is_not_leaked() {
        let response = ApiError::server("connection refused to 10.0.0.3").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], SERVER_ERROR_MESSAGE);
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn validation_errors_are_keyed_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("page_size", "must be greater or equal to 0 and lower or equal to 100");
        let response = ApiError::from(errors).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(response).await["error"]["page_size"],
            "must be greater or equal to 0 and lower or equal to 100"
        );
    }

    #[test]
    fn repository_errors_map_to_expected_statuses() {
        assert_eq!(ApiError::from(RepositoryError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(RepositoryError::EditConflict).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(RepositoryError::Timeout(std::time::Duration::from_secs(3))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_errors_map_to_expected_statuses() {
        let forbidden = AuthError::Forbidden(keel_auth::Permission::from_static("items:write"));
        assert_eq!(ApiError::from(forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(AuthError::InactiveAccount).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(AuthError::internal("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
