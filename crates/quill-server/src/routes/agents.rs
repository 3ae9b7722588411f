//! Agent lifecycle endpoints.
//!
//! Bodies are extracted fallibly so that malformed or incomplete requests
//! get the same `400` body as a request with an empty field.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::registry::AgentStatus;
use crate::state::AppState;

const DEFAULT_CHANNEL_TYPE: &str = "messaging";
const MISSING_FIELDS: &str = "Missing required fields";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartAgentRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StopAgentRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Acknowledgement body for start and stop.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub message: String,
    pub data: Vec<serde_json::Value>,
}

impl AgentResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: AgentStatus,
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

/// POST /start-ai-agent
pub async fn start_agent_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<StartAgentRequest>, JsonRejection>,
) -> Result<Json<AgentResponse>> {
    let Json(request) = body.map_err(|e| {
        tracing::debug!(error = %e, "Rejected start request body");
        ServerError::bad_request(MISSING_FIELDS)
    })?;
    let channel_id =
        required(request.channel_id).ok_or_else(|| ServerError::bad_request(MISSING_FIELDS))?;
    let channel_type =
        required(request.channel_type).unwrap_or_else(|| DEFAULT_CHANNEL_TYPE.to_string());

    state
        .registry
        .start(&channel_type, &channel_id)
        .await
        .map_err(|e| ServerError::failed("Failed to start AI Agent", e))?;

    Ok(Json(AgentResponse::new("AI Agent Started")))
}

/// POST /stop-ai-agent
pub async fn stop_agent_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<StopAgentRequest>, JsonRejection>,
) -> Result<Json<AgentResponse>> {
    let Json(request) = body.map_err(|_| ServerError::bad_request(MISSING_FIELDS))?;
    let channel_id =
        required(request.channel_id).ok_or_else(|| ServerError::bad_request(MISSING_FIELDS))?;

    let stopped = state
        .registry
        .stop(&channel_id)
        .await
        .map_err(|e| ServerError::failed("Failed to stop AI Agent", e))?;
    if !stopped {
        tracing::debug!(%channel_id, "Stop requested for channel without an agent");
    }

    Ok(Json(AgentResponse::new("AI Agent Stopped")))
}

/// GET /agent-status
pub async fn agent_status_handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusResponse>> {
    let Query(query) = query.map_err(|_| ServerError::bad_request("Missing channel_id"))?;
    let channel_id =
        required(query.channel_id).ok_or_else(|| ServerError::bad_request("Missing channel_id"))?;

    Ok(Json(StatusResponse {
        status: state.registry.status(&channel_id),
    }))
}
