//! Proof Key for Code Exchange (RFC 7636).
//!
//! A [`CodeVerifier`] is generated per authorization attempt.  Only its
//! S256 [`challenge`](CodeVerifier::code_challenge) is sent in the authorize
//! request; the raw value is sent once, at token-exchange time.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Shortest verifier allowed by RFC 7636.
pub const MIN_VERIFIER_LENGTH: usize = 43;
/// Longest verifier allowed by RFC 7636.
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// The RFC 7636 "unreserved" character set.
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    #[error("invalid code verifier length range [{min}, {max}]: need 43 <= min <= max <= 128")]
    InvalidRange { min: usize, max: usize },
}

/// A PKCE code verifier.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeVerifier {
    value: String,
}

impl CodeVerifier {
    /// Generate a verifier whose length is drawn uniformly from
    /// `[min_length, max_length]`, using the operating system CSPRNG.
    pub fn new(min_length: usize, max_length: usize) -> Result<Self, PkceError> {
        let valid = MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH;
        if min_length > max_length || !valid.contains(&min_length) || !valid.contains(&max_length)
        {
            return Err(PkceError::InvalidRange {
                min: min_length,
                max: max_length,
            });
        }

        let mut rng = OsRng;
        let length = rng.gen_range(min_length..=max_length);
        let value = (0..length)
            .map(|_| char::from(UNRESERVED[rng.gen_range(0..UNRESERVED.len())]))
            .collect();

        Ok(Self { value })
    }

    /// `base64url(SHA-256(verifier))` without padding.
    pub fn code_challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.value.as_bytes()))
    }

    /// The verifier itself, for the token-exchange request.
    pub fn raw_value(&self) -> &str {
        &self.value
    }

    #[cfg(test)]
    pub(crate) fn fixed(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

impl std::fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeVerifier").finish_non_exhaustive()
    }
}
