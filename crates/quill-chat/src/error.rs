//! Error types for the chat crate.

use thiserror::Error;

/// Result type alias using the chat error type.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Error type for chat transport operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat API rejected the request.
    #[error("Chat API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/connectivity error.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Credential could not be issued.
    #[error("Token error: {0}")]
    Token(String),

    /// Webhook signature did not match.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ChatError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ChatError::Token(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ChatError::Api {
            status: 403,
            message: "not allowed".to_string(),
        };
        assert_eq!(err.to_string(), "Chat API error (403): not allowed");
    }
}
