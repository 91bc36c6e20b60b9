//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::domain::RelayError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Malformed request body or query.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Relay(RelayError::Validation(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Relay(RelayError::InvalidState(_)) => StatusCode::CONFLICT,
            Self::Relay(RelayError::UpstreamUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Relay(RelayError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Relay(RelayError::Validation(_)) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::Relay(RelayError::NotFound { .. }) => "not_found",
            Self::Relay(RelayError::InvalidState(_)) => "invalid_state",
            Self::Relay(RelayError::UpstreamUnavailable(_)) => "upstream_unavailable",
            Self::Relay(RelayError::Persistence(_)) => "persistence_error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::BadRequest(error.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
