//! Inbound event routing.
//!
//! Webhook events arrive at one place and have to reach whichever agent or
//! response handler cares about them. Stop requests are keyed by message id
//! and delivered through [`StopRegistry`]; new messages are broadcast to all
//! agents, which filter by channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::types::{ChannelRef, ChatMessage, EventKind, InboundEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Stop Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StopInner {
    next_id: AtomicU64,
    tokens: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

/// Per-message stop signals.
#[derive(Clone, Default)]
pub struct StopRegistry {
    inner: Arc<StopInner>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in stop requests for `message_id`.
    ///
    /// The registration lasts as long as the returned guard.
    pub fn subscribe(&self, message_id: &str) -> StopSubscription {
        let token = CancellationToken::new();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .tokens
            .lock()
            .insert(message_id.to_string(), (id, token.clone()));

        StopSubscription {
            registry: self.clone(),
            message_id: message_id.to_string(),
            id,
            token,
        }
    }

    /// Signal a stop for `message_id`. Returns false if nobody is listening.
    pub fn signal(&self, message_id: &str) -> bool {
        match self.inner.tokens.lock().get(message_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unsubscribe(&self, message_id: &str, id: u64) {
        let mut tokens = self.inner.tokens.lock();
        if tokens.get(message_id).is_some_and(|(current, _)| *current == id) {
            tokens.remove(message_id);
        }
    }
}

/// Guard for a stop registration. Dropping it unsubscribes.
pub struct StopSubscription {
    registry: StopRegistry,
    message_id: String,
    id: u64,
    token: CancellationToken,
}

impl StopSubscription {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Resolves once a stop is signalled or [`cancel`](Self::cancel) is called.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger the stop locally.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A handle to the stop token that outlives the subscription.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for StopSubscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.message_id, self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Hub
// ─────────────────────────────────────────────────────────────────────────────

/// A new user message, as broadcast to agents.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: ChannelRef,
    pub message: ChatMessage,
}

/// What [`EventHub::dispatch`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A stop request; `matched` is false if no handler owned the message.
    Stop { message_id: String, matched: bool },
    /// A new message delivered to this many subscribers.
    Message { receivers: usize },
    /// Not routed.
    Ignored,
}

/// Fan-out point for inbound chat events.
#[derive(Clone)]
pub struct EventHub {
    stops: StopRegistry,
    messages: broadcast::Sender<InboundMessage>,
}

impl EventHub {
    /// Create a hub whose message channel buffers `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity.max(1));
        Self {
            stops: StopRegistry::new(),
            messages,
        }
    }

    pub fn stops(&self) -> &StopRegistry {
        &self.stops
    }

    /// Subscribe to new messages across all channels.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    /// Route one inbound event.
    pub fn dispatch(&self, event: InboundEvent) -> Dispatch {
        match event.event_kind() {
            Some(EventKind::IndicatorStop) => {
                let Some(message_id) = event.message_id else {
                    tracing::debug!("Stop event without message_id");
                    return Dispatch::Ignored;
                };
                let matched = self.stops.signal(&message_id);
                tracing::debug!(%message_id, matched, "Stop requested");
                Dispatch::Stop {
                    message_id,
                    matched,
                }
            }
            Some(EventKind::MessageNew) => {
                let channel = event.channel();
                let (Some(channel), Some(message)) = (channel, event.message) else {
                    tracing::debug!("message.new without channel or message");
                    return Dispatch::Ignored;
                };
                // No subscribers just means no agent is running.
                let receivers = self
                    .messages
                    .send(InboundMessage { channel, message })
                    .unwrap_or(0);
                Dispatch::Message { receivers }
            }
            _ => Dispatch::Ignored,
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
