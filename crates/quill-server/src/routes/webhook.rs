//! Inbound chat events.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use quill_chat::{Dispatch, InboundEvent, SIGNATURE_HEADER, verify_signature};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// POST /webhook
///
/// Verifies the payload signature (when enabled), then routes the event:
/// stop requests to the matching response handler and new messages to the
/// channel agents.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    if state.config.verify_webhooks {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized("Missing signature".to_string()))?;
        verify_signature(&body, signature, &state.config.api_secret)
            .map_err(|_| ServerError::Unauthorized("Invalid signature".to_string()))?;
    }

    let event: InboundEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Malformed webhook payload");
        ServerError::bad_request("Invalid webhook payload")
    })?;
    let kind = event.kind.clone();

    match state.events.dispatch(event) {
        Dispatch::Stop {
            message_id,
            matched,
        } => tracing::info!(%message_id, matched, "Stop generating"),
        Dispatch::Message { receivers } => {
            tracing::debug!(receivers, "Delivered new message to agents")
        }
        Dispatch::Ignored => tracing::trace!(%kind, "Ignored webhook event"),
    }

    Ok(Json(serde_json::json!({})))
}
