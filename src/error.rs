//! Request error taxonomy shared by all REST handlers.
//!
//! State-changing failures abort the whole operation and return before any
//! fan-out is attempted. Push failures after a committed write never surface
//! here; they are swallowed at the delivery layer (see events.rs).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Referenced chat/message/request/user does not exist.
    #[error("{0}")]
    NotFound(&'static str),

    /// Caller is not a participant/owner of the resource they are mutating.
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Duplicate pending request, already-resolved request, or similar.
    #[error("{0}")]
    Conflict(&'static str),

    /// Malformed or invalid input.
    #[error("{0}")]
    BadRequest(&'static str),

    /// The durable write itself failed. Fatal to the request: no event is
    /// ever published for a write that did not commit.
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("internal error")]
    Internal,
}

impl From<tokio::task::JoinError> for AppError {
    fn from(_: tokio::task::JoinError) -> Self {
        AppError::Internal
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(e) => {
                tracing::error!(error = %e, "durable store operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Never leak store internals to the client.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
