//! Channel agents for Quill.
//!
//! An agent is one bot's participation in one chat channel. It owns a
//! provider assistant and conversation thread, listens for user messages in
//! its channel, and answers each one through a [`ResponseHandler`] that
//! streams the generated text into a placeholder chat message.
//!
//! ```text
//! message.new ──▶ OpenAiAgent ──▶ ResponseHandler ──▶ partial updates
//!                     │                 │
//!                     │                 ├── web_search tool
//!                     ▼                 ▼
//!              assistant/thread    provider run
//! ```

pub mod agent;
pub mod error;
pub mod handler;
pub mod openai;
pub mod tools;

pub use agent::{
    AgentConfig, AgentContext, AgentFactory, AgentPlatform, AiAgent, BOT_NAME, SharedAgent,
    bot_identity,
};
pub use error::{AgentError, Result};
pub use handler::{HandlerParts, HandlerPhase, ResponseHandler};
pub use openai::{OpenAiAgent, OpenAiAgentFactory};
pub use tools::{WEB_SEARCH, WebSearchConfig, WebSearchTool, execute_tool_call};
