//! The closed error-kind set and its single `AppError` -> HTTP translation,
//! used by every handler in the dispatcher.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Reserved: authentication is out of scope, so nothing constructs this
    /// today, but the kind is kept in the closed set for completeness.
    #[error("{0}")]
    Unauthorized(String),
    /// Retriable IO failure that exhausted storage's internal backoff.
    #[error("{0}")]
    Transient(String),
    /// Non-retriable IO/logic failure.
    #[error("{0}")]
    Permanent(String),
    /// A panic recovered by the dispatcher's panic-recovery layer.
    #[error("internal error")]
    Panic,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Permanent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Panic => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            // Validation/NotFound/Conflict messages are caller-specific and
            // safe to surface verbatim; never include internal stack traces
            // or SQL in any other variant's message.
            AppError::Validation(m) | AppError::NotFound(m) | AppError::Conflict(m) => m.clone(),
            AppError::Unauthorized(m) => m.clone(),
            AppError::Transient(_) => "the storage backend is temporarily unavailable".into(),
            AppError::Permanent(_) => "an internal error occurred".into(),
            AppError::Panic => "an internal error occurred".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, AppError::Permanent(_) | AppError::Panic) {
            error!(error = %self, "request failed with an internal error");
        }
        let body = json!({
            "error": true,
            "message": self.message(),
            "status": status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

/// Errors surfaced by the storage port: `NotFound`, `Conflict`, `IOFailure`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("io failure: {0}")]
    IOFailure(String),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::IOFailure(m) => AppError::Transient(m),
        }
    }
}
