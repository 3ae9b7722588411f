//! Assistant-backed channel agent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quill_chat::{AiState, ChannelRef, ChatEvent, ChatMessage, ChatUser, InboundMessage, NewMessage};
use quill_llm::AssistantSpec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentContext, AgentFactory, AiAgent, SharedAgent};
use crate::error::{AgentError, Result};
use crate::handler::{HandlerParts, ResponseHandler};
use crate::tools::WebSearchTool;

#[derive(Default)]
struct Session {
    assistant_id: Option<String>,
    thread_id: Option<String>,
}

struct AgentInner {
    ctx: AgentContext,
    channel: ChannelRef,
    user: ChatUser,
    last_interaction: Mutex<DateTime<Utc>>,
    disposed: AtomicBool,
    session: Mutex<Session>,
    listener: CancellationToken,
    active: Mutex<Option<Arc<ResponseHandler>>>,
}

/// A channel agent running on an assistant provider.
pub struct OpenAiAgent {
    inner: Arc<AgentInner>,
}

impl OpenAiAgent {
    pub fn new(ctx: AgentContext, channel: ChannelRef, user: ChatUser) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                ctx,
                channel,
                user,
                last_interaction: Mutex::new(Utc::now()),
                disposed: AtomicBool::new(false),
                session: Mutex::new(Session::default()),
                listener: CancellationToken::new(),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// The handler currently streaming a response, if any.
    pub fn active_handler(&self) -> Option<Arc<ResponseHandler>> {
        self.inner.active.lock().clone()
    }

    /// Respond to a user message in this agent's channel.
    pub async fn handle_message(&self, message: ChatMessage) -> Result<()> {
        AgentInner::handle_message(&self.inner, message).await
    }

    #[cfg(test)]
    fn set_last_interaction(&self, at: DateTime<Utc>) {
        *self.inner.last_interaction.lock() = at;
    }
}

impl AgentInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.last_interaction.lock() = Utc::now();
    }

    /// Record a created resource unless the agent was disposed meanwhile.
    fn store(&self, set: impl FnOnce(&mut Session)) -> bool {
        let mut session = self.session.lock();
        if self.is_disposed() {
            return false;
        }
        set(&mut session);
        true
    }

    fn session_ids(&self) -> Option<(String, String)> {
        let session = self.session.lock();
        Some((session.assistant_id.clone()?, session.thread_id.clone()?))
    }

    fn should_respond(&self, message: &ChatMessage) -> bool {
        !self.is_disposed()
            && !message.ai_generated
            && message.user_id() != Some(self.user.id.as_str())
            && !message.text.trim().is_empty()
    }

    async fn handle_message(inner: &Arc<Self>, message: ChatMessage) -> Result<()> {
        if !inner.should_respond(&message) {
            return Ok(());
        }
        inner.touch();

        let (assistant_id, thread_id) = inner.session_ids().ok_or(AgentError::NotInitialized)?;

        let previous = inner.active.lock().take();
        if let Some(previous) = previous {
            tracing::debug!(
                channel_id = %inner.channel.id,
                message_id = %previous.message_id(),
                "Superseding active response"
            );
            previous.stop();
            let grace = inner.ctx.config.shutdown_grace;
            if tokio::time::timeout(grace, previous.finished()).await.is_err() {
                tracing::warn!(message_id = %previous.message_id(), "Previous response did not stop in time");
            }
        }

        let backend = &inner.ctx.backend;
        let transport = &inner.ctx.transport;

        backend.add_user_message(&thread_id, &message.text).await?;

        let placeholder = transport
            .send_message(&inner.channel, &NewMessage::placeholder(&inner.user.id))
            .await?;

        transport
            .send_event(
                &inner.channel,
                &inner.user.id,
                &ChatEvent::indicator(AiState::Thinking, &inner.channel, &placeholder.id),
            )
            .await?;

        let handler = Arc::new(ResponseHandler::new(HandlerParts {
            backend: backend.clone(),
            transport: transport.clone(),
            web_search: inner.ctx.web_search.clone(),
            channel: inner.channel.clone(),
            bot_user_id: inner.user.id.clone(),
            thread_id,
            assistant_id,
            message_id: placeholder.id.clone(),
            subscription: inner.ctx.events.stops().subscribe(&placeholder.id),
            flush_interval: inner.ctx.config.flush_interval,
            cancel_grace: inner.ctx.config.shutdown_grace,
        }));

        let owner: Weak<AgentInner> = Arc::downgrade(inner);
        let message_id = placeholder.id.clone();
        handler.on_dispose(move || {
            if let Some(owner) = owner.upgrade() {
                let mut active = owner.active.lock();
                if active.as_ref().is_some_and(|h| h.message_id() == message_id) {
                    *active = None;
                }
            }
        });

        *inner.active.lock() = Some(handler.clone());
        if inner.is_disposed() {
            // Lost a race with dispose; it may have missed this handler.
            handler.stop();
        }

        tracing::info!(
            channel_id = %inner.channel.id,
            message_id = %placeholder.id,
            "Generating response"
        );
        tokio::spawn(handler.run());
        Ok(())
    }

    async fn listen(inner: Arc<Self>, mut messages: broadcast::Receiver<InboundMessage>) {
        loop {
            let received = tokio::select! {
                _ = inner.listener.cancelled() => break,
                received = messages.recv() => received,
            };

            match received {
                Ok(inbound) if inbound.channel == inner.channel => {
                    if let Err(e) = Self::handle_message(&inner, inbound.message).await {
                        tracing::error!(channel_id = %inner.channel.id, error = %e, "Failed to handle message");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel_id = %inner.channel.id, skipped, "Agent fell behind on messages");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(channel_id = %inner.channel.id, "Agent listener stopped");
    }
}

#[async_trait]
impl AiAgent for OpenAiAgent {
    fn user(&self) -> Option<&ChatUser> {
        Some(&self.inner.user)
    }

    fn channel(&self) -> &ChannelRef {
        &self.inner.channel
    }

    fn last_interaction(&self) -> DateTime<Utc> {
        *self.inner.last_interaction.lock()
    }

    async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(AgentError::Disposed);
        }
        let backend = &inner.ctx.backend;
        let config = &inner.ctx.config;

        let spec = AssistantSpec::new(
            crate::agent::BOT_NAME,
            config.platform.instructions(),
            &config.model,
        )
        .with_temperature(config.temperature)
        .with_tool(WebSearchTool::definition());

        let assistant_id = backend.create_assistant(&spec).await?;
        let stored = inner.store(|s| s.assistant_id = Some(assistant_id.clone()));
        if !stored {
            if let Err(e) = backend.delete_assistant(&assistant_id).await {
                tracing::warn!(%assistant_id, error = %e, "Failed to delete assistant");
            }
            return Err(AgentError::Disposed);
        }

        let thread_id = backend.create_thread().await?;
        let stored = inner.store(|s| s.thread_id = Some(thread_id.clone()));
        if !stored {
            if let Err(e) = backend.delete_thread(&thread_id).await {
                tracing::warn!(%thread_id, error = %e, "Failed to delete thread");
            }
            return Err(AgentError::Disposed);
        }

        let messages = inner.ctx.events.subscribe_messages();
        tokio::spawn(AgentInner::listen(Arc::clone(inner), messages));

        tracing::info!(
            channel_id = %inner.channel.id,
            platform = %config.platform,
            %assistant_id,
            %thread_id,
            "Agent initialized"
        );
        Ok(())
    }

    async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.listener.cancel();

        let active = inner.active.lock().take();
        if let Some(handler) = active {
            handler.stop();
            let grace = inner.ctx.config.shutdown_grace;
            if tokio::time::timeout(grace, handler.finished()).await.is_err() {
                tracing::warn!(message_id = %handler.message_id(), "Response did not stop in time");
                handler.dispose();
            }
        }

        let session = std::mem::take(&mut *inner.session.lock());
        let backend = &inner.ctx.backend;
        if let Some(thread_id) = session.thread_id {
            if let Err(e) = backend.delete_thread(&thread_id).await {
                tracing::warn!(%thread_id, error = %e, "Failed to delete thread");
            }
        }
        if let Some(assistant_id) = session.assistant_id {
            if let Err(e) = backend.delete_assistant(&assistant_id).await {
                tracing::warn!(%assistant_id, error = %e, "Failed to delete assistant");
            }
        }

        tracing::info!(channel_id = %inner.channel.id, "Agent disposed");
    }
}

/// Builds [`OpenAiAgent`]s sharing one context.
pub struct OpenAiAgentFactory {
    ctx: AgentContext,
}

impl OpenAiAgentFactory {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

impl AgentFactory for OpenAiAgentFactory {
    fn create(&self, channel: ChannelRef, user: ChatUser) -> SharedAgent {
        Arc::new(OpenAiAgent::new(self.ctx.clone(), channel, user))
    }
}
