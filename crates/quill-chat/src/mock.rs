//! Recording chat transport for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ChatError, Result};
use crate::transport::ChatTransport;
use crate::types::{ChannelRef, ChatEvent, ChatMessage, ChatUser, MessagePatch, NewMessage};

/// One call made against the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    UpsertUser(ChatUser),
    AddMembers {
        channel: ChannelRef,
        user_ids: Vec<String>,
    },
    SendMessage {
        channel: ChannelRef,
        message: NewMessage,
        id: String,
    },
    PartialUpdate {
        message_id: String,
        patch: MessagePatch,
    },
    SendEvent {
        channel: ChannelRef,
        event: ChatEvent,
    },
}

/// A transport that records every call and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_upsert: AtomicBool,
    fail_updates: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `upsert_user` fail.
    pub fn fail_upsert(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    /// Make `partial_update_message` fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Patches applied to `message_id`, in order.
    pub fn patches_for(&self, message_id: &str) -> Vec<MessagePatch> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::PartialUpdate { message_id: id, patch } if id == message_id => {
                    Some(patch.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Events sent for `message_id`, in order.
    pub fn events_for(&self, message_id: &str) -> Vec<ChatEvent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::SendEvent { event, .. } if event.message_id == message_id => {
                    Some(event.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Ids of every message created.
    pub fn sent_message_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::SendMessage { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(ChatError::Api {
                status: 500,
                message: "upsert failed".to_string(),
            });
        }
        self.record(TransportCall::UpsertUser(user.clone()));
        Ok(())
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()> {
        self.record(TransportCall::AddMembers {
            channel: channel.clone(),
            user_ids: user_ids.to_vec(),
        });
        Ok(())
    }

    async fn send_message(
        &self,
        channel: &ChannelRef,
        message: &NewMessage,
    ) -> Result<ChatMessage> {
        let id = uuid::Uuid::new_v4().to_string();
        self.record(TransportCall::SendMessage {
            channel: channel.clone(),
            message: message.clone(),
            id: id.clone(),
        });
        Ok(ChatMessage {
            id,
            text: message.text.clone(),
            user: Some(ChatUser::new(&message.user_id)),
            ai_generated: message.ai_generated,
        })
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        _user_id: &str,
        patch: &MessagePatch,
    ) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(ChatError::Api {
                status: 500,
                message: "update failed".to_string(),
            });
        }
        self.record(TransportCall::PartialUpdate {
            message_id: message_id.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn send_event(
        &self,
        channel: &ChannelRef,
        _user_id: &str,
        event: &ChatEvent,
    ) -> Result<()> {
        self.record(TransportCall::SendEvent {
            channel: channel.clone(),
            event: event.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiState;

    #[tokio::test]
    async fn test_records_calls_per_message() {
        let transport = MockTransport::new();
        let channel = ChannelRef::new("messaging", "general");
        let message = transport
            .send_message(&channel, &NewMessage::placeholder("bot"))
            .await
            .unwrap();

        transport
            .send_event(
                &channel,
                "bot",
                &ChatEvent::indicator(AiState::Thinking, &channel, &message.id),
            )
            .await
            .unwrap();
        transport
            .partial_update_message(&message.id, "bot", &MessagePatch::finished("done"))
            .await
            .unwrap();

        assert_eq!(transport.sent_message_ids(), vec![message.id.clone()]);
        assert_eq!(transport.events_for(&message.id).len(), 1);
        assert_eq!(
            transport.patches_for(&message.id),
            vec![MessagePatch::finished("done")]
        );
    }

    #[tokio::test]
    async fn test_failing_updates() {
        let transport = MockTransport::new();
        transport.fail_updates(true);
        assert!(
            transport
                .partial_update_message("m", "bot", &MessagePatch::streaming("x"))
                .await
                .is_err()
        );
        assert!(transport.calls().is_empty());
    }
}
