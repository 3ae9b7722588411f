//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// AI provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] quill_llm::LlmError),

    /// Chat transport error.
    #[error("Chat error: {0}")]
    Chat(#[from] quill_chat::ChatError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The agent was used before `init` completed.
    #[error("Agent not initialized")]
    NotInitialized,

    /// The agent was disposed.
    #[error("Agent disposed")]
    Disposed,
}

impl AgentError {
    /// Create a tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
