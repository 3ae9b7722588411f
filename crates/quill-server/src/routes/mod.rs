//! API routes.

pub mod agents;
pub mod health;
pub mod root;
pub mod token;
pub mod webhook;

pub use agents::{
    AgentResponse, StartAgentRequest, StatusQuery, StatusResponse, StopAgentRequest,
    agent_status_handler, start_agent_handler, stop_agent_handler,
};
pub use health::{HealthResponse, health, health_routes};
pub use root::{RootResponse, root_handler};
pub use token::{TokenRequest, TokenResponse, token_handler};
pub use webhook::webhook_handler;
