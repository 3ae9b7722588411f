//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Request failed validation.
    #[error("{0}")]
    BadRequest(String),

    /// Request could not be authenticated.
    #[error("{0}")]
    Unauthorized(String),

    /// An operation failed; `reason` carries the underlying cause.
    #[error("{message}: {reason}")]
    Failed { message: String, reason: String },

    /// Internal server error without a reportable cause.
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn failed(message: impl Into<String>, reason: impl ToString) -> Self {
        Self::Failed {
            message: message.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Underlying cause, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Failed { .. } | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Server error");
        } else {
            tracing::warn!(status = %status, error = %self, "Client error");
        }

        let body = match self {
            ServerError::Failed { message, reason } => ErrorResponse {
                error: message,
                reason: Some(reason),
            },
            ServerError::BadRequest(message)
            | ServerError::Unauthorized(message)
            | ServerError::Internal(message) => ErrorResponse {
                error: message,
                reason: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
