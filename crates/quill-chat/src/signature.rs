//! Webhook signature verification.
//!
//! The chat platform signs each webhook body with HMAC-SHA256 keyed by the
//! API secret and sends the hex digest in the `X-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{ChatError, Result};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

type HmacSha256 = Hmac<Sha256>;

fn digest(payload: &[u8], secret: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ChatError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex HMAC-SHA256 of `payload`.
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String> {
    Ok(hex::encode(digest(payload, secret)?))
}

/// Verify a hex signature against `payload` in constant time.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> Result<()> {
    let provided = hex::decode(signature.trim()).map_err(|_| ChatError::InvalidSignature)?;
    let expected = digest(payload, secret)?;

    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(ChatError::InvalidSignature)
    }
}
