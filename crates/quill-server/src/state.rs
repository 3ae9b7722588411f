//! Application state shared across handlers.

use std::sync::Arc;

use quill_chat::EventHub;

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Active channel agents.
    pub registry: Arc<SessionRegistry>,

    /// Routes inbound chat events to agents and handlers.
    pub events: EventHub,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(registry: Arc<SessionRegistry>, events: EventHub, config: ServerConfig) -> Self {
        Self {
            registry,
            events,
            config: Arc::new(config),
        }
    }
}
