//! Landing endpoint.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Greeting returned by `GET /`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub message: String,
    /// Public chat API key, for clients bootstrapping a connection.
    #[serde(rename = "apikey")]
    pub api_key: String,
    pub active_agents: usize,
}

pub async fn root_handler(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "AI Writing Assistant Server is running...".to_string(),
        api_key: state.config.api_key.clone(),
        active_agents: state.registry.len(),
    })
}
