//! Wire types shared with the chat platform.

use serde::{Deserialize, Serialize};

/// Derive the bot user id for a channel.
///
/// The chat platform rejects `!` in user ids, so every occurrence is removed.
pub fn bot_user_id(channel_id: &str) -> String {
    format!("ai-bot-{}", channel_id.replace('!', ""))
}

/// A channel addressed by type and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_type: String,
    pub id: String,
}

impl ChannelRef {
    pub fn new(channel_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            id: id.into(),
        }
    }

    /// The combined `type:id` channel identifier.
    pub fn cid(&self) -> String {
        format!("{}:{}", self.channel_type, self.id)
    }

    /// Parse a `type:id` channel identifier.
    pub fn from_cid(cid: &str) -> Option<Self> {
        let (channel_type, id) = cid.split_once(':')?;
        if channel_type.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(channel_type, id))
    }
}

/// A chat user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// A message as returned by the chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChatUser>,
    #[serde(default)]
    pub ai_generated: bool,
}

impl ChatMessage {
    /// Id of the author, if the platform included one.
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

/// A message to be created in a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub text: String,
    pub user_id: String,
    pub ai_generated: bool,
}

impl NewMessage {
    /// An empty AI-authored placeholder that will be filled while streaming.
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            user_id: user_id.into(),
            ai_generated: true,
        }
    }
}

/// Fields set by a partial message update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generating: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MessagePatch {
    /// Intermediate text while the response is still being generated.
    pub fn streaming(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            generating: Some(true),
            message: None,
        }
    }

    /// The complete response text.
    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            generating: Some(false),
            message: None,
        }
    }

    /// Replace the message body with an error description.
    pub fn error(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            text: Some(description.clone()),
            generating: None,
            message: Some(description),
        }
    }
}

/// State shown by the client-side AI typing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

/// Custom and built-in event types Quill sends or reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ai_indicator.update")]
    IndicatorUpdate,
    #[serde(rename = "ai_indicator.clear")]
    IndicatorClear,
    #[serde(rename = "ai_indicator.stop")]
    IndicatorStop,
    #[serde(rename = "message.new")]
    MessageNew,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IndicatorUpdate => "ai_indicator.update",
            EventKind::IndicatorClear => "ai_indicator.clear",
            EventKind::IndicatorStop => "ai_indicator.stop",
            EventKind::MessageNew => "message.new",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "ai_indicator.update" => Some(EventKind::IndicatorUpdate),
            "ai_indicator.clear" => Some(EventKind::IndicatorClear),
            "ai_indicator.stop" => Some(EventKind::IndicatorStop),
            "message.new" => Some(EventKind::MessageNew),
            _ => None,
        }
    }
}

/// An event sent into a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_state: Option<AiState>,
    pub cid: String,
    pub message_id: String,
}

impl ChatEvent {
    /// `ai_indicator.update` for a message.
    pub fn indicator(state: AiState, channel: &ChannelRef, message_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::IndicatorUpdate,
            ai_state: Some(state),
            cid: channel.cid(),
            message_id: message_id.into(),
        }
    }

    /// `ai_indicator.clear` for a message.
    pub fn clear(channel: &ChannelRef, message_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::IndicatorClear,
            ai_state: None,
            cid: channel.cid(),
            message_id: message_id.into(),
        }
    }
}

/// An event delivered by the chat platform, e.g. through a webhook.
///
/// Only the fields Quill routes on are modelled; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub user: Option<ChatUser>,
}

impl InboundEvent {
    /// The event kind, if it is one Quill knows.
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.kind)
    }

    /// The channel this event belongs to.
    pub fn channel(&self) -> Option<ChannelRef> {
        match (&self.channel_type, &self.channel_id) {
            (Some(channel_type), Some(id)) => Some(ChannelRef::new(channel_type, id)),
            _ => self.cid.as_deref().and_then(ChannelRef::from_cid),
        }
    }
}
