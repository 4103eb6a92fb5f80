//! OpenID Connect relying-party client.
//!
//! [`IdentityProvider`] is the seam between the auth server and the external
//! OpenID Provider.  [`OidcProvider`] implements it over HTTP: discovery,
//! authorization-code exchange, ID-token verification against the provider's
//! published keys, and the user-info endpoint.
//!
//! No call made here sets its own timeout or retries.  Bound them through the
//! `reqwest::Client` handed in at construction.  Dropping a future (for
//! example when the inbound request is cancelled) aborts the outbound call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Deserializer};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::config::OidcConfig;
use crate::principal::Principal;

/// Clock skew tolerated when checking `exp`, `nbf` and `iat` of ID tokens.
pub const CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(30);

/// Minimum time between two JWKS fetches triggered by an unknown `kid`.
/// Forged tokens with fresh key ids must not turn into outbound requests.
pub const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Signature algorithms accepted for ID tokens.  Symmetric algorithms are
/// excluded: the client secret must never double as a signing key.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("issuer mismatch: expected {expected}, provider reports {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("failed to fetch signing keys: {0}")]
    Jwks(String),

    #[error("no signing key matches kid {0:?}")]
    KeyNotFound(Option<String>),

    #[error("unsupported ID token algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("invalid ID token: {0}")]
    InvalidToken(String),

    #[error("authorization code exchange failed: {0}")]
    Exchange(String),

    #[error("provider does not publish a userinfo endpoint")]
    NoUserInfoEndpoint,

    #[error("userinfo request failed: {0}")]
    UserInfo(String),

    #[error("failed to reach identity provider: {0}")]
    Http(#[from] reqwest::Error),
}

/// Subset of the provider's discovery document used by this crate.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Response of the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Claims read from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub groups: Vec<String>,
}

impl IdTokenClaims {
    /// The caller identity: email when present, subject otherwise.
    pub fn into_principal(self) -> Principal {
        let id = self.email.filter(|e| !e.is_empty()).unwrap_or(self.sub);
        Principal::new(id, self.groups)
    }
}

/// Claims returned by the user-info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub groups: Vec<String>,
}

/// Providers disagree on whether a single group is a string or a list.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null,
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(group) => vec![group],
        OneOrMany::Many(groups) => groups,
        OneOrMany::Null => Vec::new(),
    })
}

/// Operations the auth server needs from an OpenID Provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization endpoint URL carrying `state` and the requested scopes.
    fn authorization_url(&self, state: &str, scopes: &[String]) -> String;

    /// Exchange an authorization code at the token endpoint.
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError>;

    /// Verify signature, issuer, audience and expiry of a raw ID token.
    async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, OidcError>;

    /// Query the user-info endpoint with a bearer token.
    async fn user_info(&self, access_token: &str) -> Result<UserInfoClaims, OidcError>;
}

/// HTTP-backed [`IdentityProvider`] built from the provider's discovery
/// document.
pub struct OidcProvider {
    http: reqwest::Client,
    metadata: ProviderMetadata,
    authorization_endpoint: Url,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    jwks: RwLock<Option<CachedKeys>>,
    jwks_fetch: Mutex<()>,
    jwks_refresh_interval: Duration,
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

impl OidcProvider {
    /// Fetch `{issuer}/.well-known/openid-configuration` and build a provider.
    pub async fn discover(http: reqwest::Client, config: &OidcConfig) -> Result<Self, OidcError> {
        let issuer = config.issuer_url.trim_end_matches('/');
        let url = format!("{issuer}/.well-known/openid-configuration");

        let res = http.get(&url).header(ACCEPT, "application/json").send().await?;
        if !res.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "{url} returned {}",
                res.status()
            )));
        }
        let metadata: ProviderMetadata = res
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        if metadata.issuer.trim_end_matches('/') != issuer {
            return Err(OidcError::IssuerMismatch {
                expected: config.issuer_url.clone(),
                actual: metadata.issuer,
            });
        }

        info!(
            issuer = %metadata.issuer,
            authorization_endpoint = %metadata.authorization_endpoint,
            "OIDC provider discovered"
        );

        Self::from_metadata(http, metadata, config)
    }

    /// Build a provider from an already known discovery document.
    pub fn from_metadata(
        http: reqwest::Client,
        metadata: ProviderMetadata,
        config: &OidcConfig,
    ) -> Result<Self, OidcError> {
        let authorization_endpoint = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| OidcError::Discovery(format!("invalid authorization_endpoint: {e}")))?;

        Ok(Self {
            http,
            metadata,
            authorization_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            jwks: RwLock::new(None),
            jwks_fetch: Mutex::new(()),
            jwks_refresh_interval: JWKS_MIN_REFRESH_INTERVAL,
        })
    }

    /// Override [`JWKS_MIN_REFRESH_INTERVAL`].
    #[must_use]
    pub fn with_jwks_refresh_interval(mut self, interval: Duration) -> Self {
        self.jwks_refresh_interval = interval;
        self
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Cached keys, unless `refresh` asks for newer ones and the cache is
    /// older than the refresh interval.
    async fn cached_keys(&self, refresh: bool) -> Option<Arc<JwkSet>> {
        let cache = self.jwks.read().await;
        let cached = cache.as_ref()?;
        (!refresh || cached.fetched_at.elapsed() < self.jwks_refresh_interval)
            .then(|| cached.keys.clone())
    }

    /// Cached JWKS; `refresh` refetches (key rotation) at most once per
    /// refresh interval.
    async fn signing_keys(&self, refresh: bool) -> Result<Arc<JwkSet>, OidcError> {
        if let Some(keys) = self.cached_keys(refresh).await {
            return Ok(keys);
        }

        // One fetch at a time; whoever waited reuses the result.
        let _fetching = self.jwks_fetch.lock().await;
        if let Some(keys) = self.cached_keys(refresh).await {
            return Ok(keys);
        }

        debug!(jwks_uri = %self.metadata.jwks_uri, "fetching signing keys");
        let res = self
            .http
            .get(&self.metadata.jwks_uri)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OidcError::Jwks(e.to_string()))?;
        if !res.status().is_success() {
            return Err(OidcError::Jwks(format!(
                "{} returned {}",
                self.metadata.jwks_uri,
                res.status()
            )));
        }
        let keys: Arc<JwkSet> = Arc::new(res.json().await.map_err(|e| OidcError::Jwks(e.to_string()))?);

        *self.jwks.write().await = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

fn select_jwk<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorization_url(&self, state: &str, scopes: &[String]) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
        let res = self
            .http
            .post(&self.metadata.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(OidcError::Exchange(format!(
                "provider returned {status}: {text}"
            )));
        }

        res.json()
            .await
            .map_err(|e| OidcError::Exchange(format!("unreadable token response: {e}")))
    }

    async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, OidcError> {
        let header = decode_header(raw).map_err(|e| OidcError::InvalidToken(e.to_string()))?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::UnsupportedAlgorithm(header.alg));
        }

        let keys = self.signing_keys(false).await?;
        let jwk = match select_jwk(&keys, header.kid.as_deref()) {
            Some(jwk) => jwk.clone(),
            None => {
                let keys = self.signing_keys(true).await?;
                select_jwk(&keys, header.kid.as_deref())
                    .cloned()
                    .ok_or_else(|| OidcError::KeyNotFound(header.kid.clone()))?
            }
        };
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| OidcError::Jwks(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.metadata.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = CLOCK_SKEW_LEEWAY.as_secs();

        decode::<IdTokenClaims>(raw, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfoClaims, OidcError> {
        let endpoint = self
            .metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or(OidcError::NoUserInfoEndpoint)?;

        let res = self
            .http
            .get(endpoint)
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(OidcError::UserInfo(format!(
                "provider returned {}",
                res.status()
            )));
        }

        res.json()
            .await
            .map_err(|e| OidcError::UserInfo(format!("unreadable userinfo response: {e}")))
    }
}
