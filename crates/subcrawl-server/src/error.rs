use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use subcrawl_core::error::{AppError, FetchErrorKind, VerificationErrorKind};

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::DuplicateSource { .. } => (StatusCode::CONFLICT, "duplicate_source"),
            AppError::RunAlreadyActive { .. } => (StatusCode::CONFLICT, "run_already_active"),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            AppError::FingerprintConflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::EmptyScope(_) => (StatusCode::UNPROCESSABLE_ENTITY, "empty_scope"),
            AppError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "config_error"),
            AppError::Parse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "parse_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Serialization(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            AppError::Verification {
                kind: VerificationErrorKind::RateLimited,
                ..
            } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            AppError::Verification {
                kind: VerificationErrorKind::Timeout,
                ..
            }
            | AppError::Fetch {
                kind: FetchErrorKind::Timeout,
                ..
            } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::Verification { .. } => (StatusCode::BAD_GATEWAY, "verification_error"),
            AppError::Fetch { .. } => (StatusCode::BAD_GATEWAY, "fetch_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
