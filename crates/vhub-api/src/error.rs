//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use vhub_engine::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::ClassifierNotFound(_) | EngineError::ConnectionNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::UnknownType(_) | EngineError::InvalidRequest(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::ClassifierExists(_) => StatusCode::CONFLICT,
                EngineError::NoFrameAvailable => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Initialization { .. } => StatusCode::BAD_GATEWAY,
                EngineError::NotInitialized(_) | EngineError::DetectionFailed { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::Engine(EngineError::NoFrameAvailable) => Some("no_frame"),
            ApiError::Engine(EngineError::ClassifierNotFound(_)) => Some("classifier_not_found"),
            ApiError::Engine(EngineError::InvalidRequest(_)) => Some("invalid_request"),
            ApiError::Engine(EngineError::Initialization { .. }) => Some("initialization_failed"),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code().map(str::to_string),
        };

        (status, Json(body)).into_response()
    }
}
