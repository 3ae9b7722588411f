//! The agent abstraction and its configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_chat::{ChannelRef, ChatUser, EventHub, SharedTransport, bot_user_id};
use quill_llm::SharedBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::tools::WebSearchTool;

/// Display name of every bot user.
pub const BOT_NAME: &str = "AI Writing Assistant";

/// The chat identity of the bot for a channel.
pub fn bot_identity(channel_id: &str) -> ChatUser {
    ChatUser::new(bot_user_id(channel_id)).with_name(BOT_NAME)
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Trait
// ─────────────────────────────────────────────────────────────────────────────

/// One bot's participation in one chat channel.
#[async_trait]
pub trait AiAgent: Send + Sync {
    /// The bot user the agent speaks as.
    fn user(&self) -> Option<&ChatUser>;

    /// The channel the agent serves.
    fn channel(&self) -> &ChannelRef;

    /// When a user last interacted with the agent.
    fn last_interaction(&self) -> DateTime<Utc>;

    /// Acquire provider resources and start listening for messages.
    async fn init(&self) -> Result<()>;

    /// Release everything. Safe to call more than once.
    async fn dispose(&self);
}

/// An agent that can be shared across tasks.
pub type SharedAgent = Arc<dyn AiAgent>;

/// Builds agents for the session registry.
pub trait AgentFactory: Send + Sync {
    /// Construct an uninitialized agent for `channel` speaking as `user`.
    fn create(&self, channel: ChannelRef, user: ChatUser) -> SharedAgent;
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────────

/// Which assistant flavour an agent runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPlatform {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    WritingAssistant,
}

impl AgentPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPlatform::OpenAi => "openai",
            AgentPlatform::WritingAssistant => "writing_assistant",
        }
    }

    /// System instructions for the assistant.
    pub fn instructions(&self) -> &'static str {
        match self {
            AgentPlatform::OpenAi => {
                "You are a helpful AI assistant participating in a group chat. \
                 Answer clearly and concisely. When a question needs current \
                 information, use the web_search tool and cite what you found."
            }
            AgentPlatform::WritingAssistant => {
                "You are an expert writing assistant. Help users draft, edit, \
                 and improve content: suggest clearer wording, fix grammar, \
                 adapt tone to the audience, and propose structure for longer \
                 pieces. When facts or recent events matter, use the web_search \
                 tool before answering. Keep replies focused and ready to paste."
            }
        }
    }
}

impl fmt::Display for AgentPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentPlatform {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(AgentPlatform::OpenAi),
            "writing_assistant" | "writing-assistant" => Ok(AgentPlatform::WritingAssistant),
            other => Err(AgentError::config(format!("unknown agent platform: {other}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Settings shared by every agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub platform: AgentPlatform,
    pub model: String,
    pub temperature: f32,
    /// Minimum time between partial message updates.
    pub flush_interval: Duration,
    /// How long dispose waits for an in-flight response to wind down.
    pub shutdown_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            platform: AgentPlatform::default(),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            flush_interval: Duration::from_millis(1000),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl AgentConfig {
    pub fn with_platform(mut self, platform: AgentPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Collaborators every agent needs.
#[derive(Clone)]
pub struct AgentContext {
    pub backend: SharedBackend,
    pub transport: SharedTransport,
    pub events: EventHub,
    pub web_search: Arc<WebSearchTool>,
    pub config: AgentConfig,
}
