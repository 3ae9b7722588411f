//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Channels with a registered agent.
    pub active_agents: usize,
    pub webhook_verification: bool,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_agents: state.registry.len(),
        webhook_verification: state.config.verify_webhooks,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
