//! CSRF protection state for the OIDC authorization-code flow.
//!
//! The state travels to the identity provider in the `state` query parameter
//! and, byte-identical, in a short-lived `state` cookie.  At callback time the
//! two copies are compared before anything else is trusted, which keeps the
//! server stateless: no session table is needed to correlate the round trip.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Bytes of entropy in a generated nonce, before encoding.
pub const NONCE_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("malformed session state: {0}")]
    Malformed(String),
}

/// State carried between the authorization request and the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "n")]
    pub nonce: String,
    pub return_url: String,
}

impl SessionState {
    /// Fresh state with a random nonce.
    pub fn new(return_url: impl Into<String>) -> Self {
        Self {
            nonce: generate_nonce(),
            return_url: return_url.into(),
        }
    }

    /// `base64(JSON({"n": nonce, "return_url": url}))`.
    pub fn encode(&self) -> Result<String, StateError> {
        let json = serde_json::to_vec(self).map_err(|e| StateError::Malformed(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(value: &str) -> Result<Self, StateError> {
        let bytes = STANDARD
            .decode(value)
            .map_err(|e| StateError::Malformed(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Malformed(format!("invalid JSON: {e}")))
    }
}

/// 32 random bytes from the OS CSPRNG, base64 encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
