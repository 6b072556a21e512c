use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::jobs::ControlError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("operation not supported for job: {0}")]
    Unsupported(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("no backend accepts this URL")]
    DispatchFailed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unsupported(_) => StatusCode::CONFLICT,
            ApiError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DispatchFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unsupported(_) => "UNSUPPORTED_OPERATION",
            ApiError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            ApiError::DispatchFailed => "DISPATCH_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(value: ControlError) -> Self {
        match value {
            ControlError::NotFound(id) => ApiError::NotFound(format!("job {id}")),
            ControlError::BackendUnavailable(backend) => {
                ApiError::BackendUnavailable(backend.to_string())
            }
            ControlError::DispatchFailed => ApiError::DispatchFailed,
        }
    }
}
