use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tranh_core::Error as CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for request failures and adds server-side variants.
/// Responses carry `{"detail": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No generated image under the requested name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request body over the configured upload limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// A server-side failure unrelated to the model or translation, such as
    /// failing to persist the output image.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Core(CoreError::validation(msg))
    }

    /// A rejected request body: too large when axum reports 413, otherwise
    /// malformed input.
    pub fn body(status: StatusCode, msg: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(msg)
        } else {
            Self::validation(msg)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Core(core) => match core {
                CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                CoreError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETER"),
                CoreError::Translation(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "TRANSLATION_ERROR")
                }
                CoreError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_ERROR"),
            },
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        } else {
            tracing::debug!(error = %self, code, "rejected request");
        }

        let body = json!({
            "detail": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
