//! User token issuance.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use quill_chat::{create_user_token, user_token_ttl};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::state::AppState;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /token
pub async fn token_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>> {
    let user_id = body
        .ok()
        .and_then(|Json(request)| request.user_id)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ServerError::bad_request("userId is required"))?;

    let token =
        create_user_token(&user_id, &state.config.api_secret, user_token_ttl()).map_err(|e| {
            tracing::error!(%user_id, error = %e, "Token generation failed");
            ServerError::Internal("Failed to generate token".to_string())
        })?;

    Ok(Json(TokenResponse { token }))
}
