//! Error handling for the HTTP surface.
//!
//! Engine errors carry their taxonomy kind; this layer only maps kinds to
//! status codes and renders the `{"error": {code, message}}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pagesmith_core::EngineError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("missing or empty API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("file exceeds the {0} MB upload limit")]
    TooLarge(u64),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "auth"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::UnsupportedType(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ApiError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "validation"),
            ApiError::Engine(err) => {
                let status = match err {
                    EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::Conflict(_) => StatusCode::CONFLICT,
                    EngineError::QueueUnavailable(_) | EngineError::StoreUnavailable(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    EngineError::FetchFailed(_)
                    | EngineError::ConvertFailed(_)
                    | EngineError::SplitFailed(_)
                    | EngineError::Timeout(_)
                    | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
