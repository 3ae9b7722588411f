//! Chat platform credentials.
//!
//! Both kinds of token are HS256 JWTs signed with the API secret. User tokens
//! are handed to frontends; the server token authenticates REST calls.

use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Lifetime of user tokens in seconds.
pub const USER_TOKEN_TTL_SECS: i64 = 3600;

/// Lifetime of user tokens.
pub fn user_token_ttl() -> Duration {
    Duration::seconds(USER_TOKEN_TTL_SECS)
}

/// Claims carried by a user token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

#[derive(Debug, Serialize)]
struct ServerClaims {
    server: bool,
}

/// Issue a token for `user_id` valid for `ttl` from now.
pub fn create_user_token(user_id: &str, secret: &str, ttl: Duration) -> Result<String> {
    if user_id.is_empty() {
        return Err(ChatError::Token("user id must not be empty".to_string()));
    }
    if secret.is_empty() {
        return Err(ChatError::Config("API secret is not configured".to_string()));
    }

    let now = Utc::now();
    let claims = UserClaims {
        user_id: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Issue the server-side token used for REST calls.
pub fn create_server_token(secret: &str) -> Result<String> {
    if secret.is_empty() {
        return Err(ChatError::Config("API secret is not configured".to_string()));
    }
    Ok(encode(
        &Header::default(),
        &ServerClaims { server: true },
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
