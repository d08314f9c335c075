use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown journey: {0}")]
    UnknownJourney(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    OrderingConflict(String),
    #[error("{0}")]
    ApplicationClosed(String),
    #[error("session expired")]
    SessionExpired,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict")]
    Conflict,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::UnknownJourney(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::OrderingConflict(_) | ApiError::ApplicationClosed(_) | ApiError::Conflict => {
                StatusCode::CONFLICT
            }
            ApiError::SessionExpired => StatusCode::GONE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::UnknownJourney(_) => "unknown_journey",
            ApiError::Config(_) => "config_error",
            ApiError::OrderingConflict(_) => "ordering_conflict",
            ApiError::ApplicationClosed(_) => "application_closed",
            ApiError::SessionExpired => "session_expired",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict => "conflict",
            ApiError::Internal => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
