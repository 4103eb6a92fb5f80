//! Local admin tokens.
//!
//! Lets the product work without an external identity provider: after a
//! successful password check the server issues an HS256 JWT signed with a
//! secret that only lives in this process.  Restarting the server rotates
//! the secret and therefore invalidates every outstanding admin token.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Subject of every locally signed token.
pub const ADMIN_SUBJECT: &str = "admin";

/// Size of the per-process HMAC secret.
pub const SECRET_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims carried by a local admin token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl AdminClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Issues and validates local admin tokens with a process-lifetime secret.
///
/// The secret is never persisted and never leaves this struct.  Share one
/// instance behind an `Arc`; it is read-only after construction.
pub struct HmacTokenSignerVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl HmacTokenSignerVerifier {
    /// Create a signer with a freshly generated 64-byte secret.
    pub fn new(lifetime: Duration) -> Self {
        let mut secret = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);

        Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            lifetime,
        }
    }

    /// Sign a token for [`ADMIN_SUBJECT`] expiring `lifetime` from now.
    pub fn sign(&self) -> Result<String, TokenError> {
        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        self.sign_with_expiry(Utc::now(), Utc::now() + lifetime)
    }

    fn sign_with_expiry(
        &self,
        issued_at: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = AdminClaims {
            sub: ADMIN_SUBJECT.to_string(),
            iat: issued_at.timestamp(),
            exp: expiry.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check the MAC and the expiry, returning the claims on success.
    ///
    /// The MAC comparison is constant-time.
    pub fn verify(&self, token: &str) -> Result<AdminClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<AdminClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}

impl std::fmt::Debug for HmacTokenSignerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenSignerVerifier")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_returns_admin_subject_before_expiry() {
        let signer = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        let token = signer.sign().unwrap();

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, ADMIN_SUBJECT);
        assert_eq!(claims.exp - claims.iat, 300);
        assert!(claims.expires_at().unwrap() > Utc::now());
    }

    #[test]
    fn expired_token_is_rejected_as_expired() {
        let signer = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        let issued = Utc::now() - chrono::Duration::minutes(10);
        let token = signer
            .sign_with_expiry(issued, issued + chrono::Duration::minutes(5))
            .unwrap();

        assert!(matches!(signer.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn token_from_another_instance_has_invalid_signature() {
        let a = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        let b = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        let token = a.sign().unwrap();

        assert!(matches!(
            b.verify(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        let token = signer.sign().unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            br#"{"sub":"root","iat":0,"exp":99999999999}"#,
        );
        parts[1] = &forged;

        assert!(matches!(
            signer.verify(&parts.join(".")),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let signer = HmacTokenSignerVerifier::new(Duration::from_secs(300));
        assert!(matches!(
            signer.verify("not-a-token"),
            Err(TokenError::Malformed(_))
        ));
    }
}
