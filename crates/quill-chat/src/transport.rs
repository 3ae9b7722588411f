//! Chat transport trait and the Stream Chat REST implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::token::create_server_token;
use crate::types::{ChannelRef, ChatEvent, ChatMessage, ChatUser, MessagePatch, NewMessage};

const DEFAULT_BASE_URL: &str = "https://chat.stream-io-api.com";

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Operations Quill needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Create or update a user.
    async fn upsert_user(&self, user: &ChatUser) -> Result<()>;

    /// Add users to a channel. Adding an existing member is not an error.
    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()>;

    /// Create a message and return it as stored by the platform.
    async fn send_message(&self, channel: &ChannelRef, message: &NewMessage)
    -> Result<ChatMessage>;

    /// Set fields on an existing message.
    async fn partial_update_message(
        &self,
        message_id: &str,
        user_id: &str,
        patch: &MessagePatch,
    ) -> Result<()>;

    /// Send a custom event into a channel on behalf of `user_id`.
    async fn send_event(&self, channel: &ChannelRef, user_id: &str, event: &ChatEvent)
    -> Result<()>;
}

/// A transport that can be shared across tasks.
pub type SharedTransport = Arc<dyn ChatTransport>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Stream Chat REST client.
#[derive(Debug, Clone)]
pub struct StreamChatConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl StreamChatConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create config from `STREAM_API_KEY` and `STREAM_API_SECRET`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("STREAM_API_KEY")
            .map_err(|_| ChatError::Config("STREAM_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("STREAM_API_SECRET")
            .map_err(|_| ChatError::Config("STREAM_API_SECRET not set".to_string()))?;
        let mut config = Self::new(api_key, api_secret);
        if let Ok(base_url) = std::env::var("STREAM_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Chat Client
// ─────────────────────────────────────────────────────────────────────────────

/// Server-side REST client for Stream Chat.
pub struct StreamChatClient {
    client: Client,
    config: StreamChatConfig,
    server_token: String,
}

impl StreamChatClient {
    pub fn new(config: StreamChatConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ChatError::Config("Stream API key is empty".to_string()));
        }
        let server_token = create_server_token(&config.api_secret)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            server_token,
        })
    }

    pub fn config(&self) -> &StreamChatConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .query(&[("api_key", self.config.api_key.as_str())])
            .header("Authorization", &self.server_token)
            .header("Stream-Auth-Type", "jwt")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.authorize(request).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<StreamErrorResponse>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn channel_path(channel: &ChannelRef) -> String {
        format!("/channels/{}/{}", channel.channel_type, channel.id)
    }
}

#[async_trait]
impl ChatTransport for StreamChatClient {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        let mut users = serde_json::Map::new();
        users.insert(user.id.clone(), serde_json::to_value(user)?);
        let body = json!({ "users": users });
        self.send(self.client.post(self.url("/users")).json(&body))
            .await?;
        tracing::debug!(user_id = %user.id, "Upserted chat user");
        Ok(())
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()> {
        let body = json!({ "add_members": user_ids });
        self.send(
            self.client
                .post(self.url(&Self::channel_path(channel)))
                .json(&body),
        )
        .await?;
        tracing::debug!(cid = %channel.cid(), members = ?user_ids, "Added channel members");
        Ok(())
    }

    async fn send_message(
        &self,
        channel: &ChannelRef,
        message: &NewMessage,
    ) -> Result<ChatMessage> {
        let path = format!("{}/message", Self::channel_path(channel));
        let body = json!({ "message": message });
        let value = self.send(self.client.post(self.url(&path)).json(&body)).await?;
        let response: MessageResponse = serde_json::from_value(value)?;
        Ok(response.message)
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        user_id: &str,
        patch: &MessagePatch,
    ) -> Result<()> {
        let path = format!("/messages/{message_id}");
        let body = json!({ "set": patch, "user_id": user_id });
        self.send(self.client.put(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }

    async fn send_event(
        &self,
        channel: &ChannelRef,
        user_id: &str,
        event: &ChatEvent,
    ) -> Result<()> {
        let path = format!("{}/event", Self::channel_path(channel));
        let mut payload = serde_json::to_value(event)?;
        if let Value::Object(ref mut map) = payload {
            map.insert("user_id".to_string(), Value::String(user_id.to_string()));
        }
        let body = json!({ "event": payload });
        self.send(self.client.post(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamErrorResponse {
    message: String,
}
