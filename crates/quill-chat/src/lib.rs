//! Chat transport layer for Quill.
//!
//! Everything the service needs from the hosted chat platform lives here:
//!
//! - [`ChatTransport`]: user provisioning, channel membership, message
//!   creation, partial message updates and custom events
//! - [`StreamChatClient`]: the REST implementation of the transport
//! - [`EventHub`] / [`StopRegistry`]: fan-out of inbound events to agents and
//!   per-message stop signals for in-flight responses
//! - [`token`]: user credentials for the chat platform
//! - [`signature`]: verification of inbound webhook payloads

pub mod error;
pub mod events;
pub mod signature;
pub mod token;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use error::{ChatError, Result};
pub use events::{Dispatch, EventHub, InboundMessage, StopRegistry, StopSubscription};
pub use signature::{SIGNATURE_HEADER, sign_payload, verify_signature};
pub use token::{UserClaims, create_server_token, create_user_token, user_token_ttl};
pub use transport::{ChatTransport, SharedTransport, StreamChatClient, StreamChatConfig};
pub use types::{
    AiState, ChannelRef, ChatEvent, ChatMessage, ChatUser, EventKind, InboundEvent, MessagePatch,
    NewMessage, bot_user_id,
};

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockTransport, TransportCall};
