//! OAuth2 + PKCE against git hosting providers.
//!
//! Used by the operator CLI to obtain a GitHub / GitLab token: the browser is
//! sent to [`authorize_url`](GitProviderClient::authorize_url) with the PKCE
//! challenge, and the code that comes back is redeemed at
//! [`token_url`](GitProviderClient::token_url) together with the raw
//! verifier.  URL construction is pure; only
//! [`exchange_code`](GitProviderClient::exchange_code) touches the network.

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::config::GitProviderCredentials;
use crate::pkce::CodeVerifier;

#[derive(Debug, thiserror::Error)]
pub enum GitProviderError {
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("failed to reach git provider: {0}")]
    Http(#[from] reqwest::Error),
}

/// Supported git hosting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
}

impl GitProvider {
    fn default_base_url(self) -> &'static str {
        match self {
            Self::GitHub => "https://github.com",
            Self::GitLab => "https://gitlab.com",
        }
    }

    fn authorize_path(self) -> &'static str {
        match self {
            Self::GitHub => "/login/oauth/authorize",
            Self::GitLab => "/oauth/authorize",
        }
    }

    fn token_path(self) -> &'static str {
        match self {
            Self::GitHub => "/login/oauth/access_token",
            Self::GitLab => "/oauth/token",
        }
    }
}

impl std::fmt::Display for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => f.write_str("github"),
            Self::GitLab => f.write_str("gitlab"),
        }
    }
}

/// Token returned by a git provider.
#[derive(Debug, Clone)]
pub struct GitProviderToken {
    pub access_token: String,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// GitHub answers failed exchanges with 200 and an `error` field.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth client for one git provider.
#[derive(Debug, Clone)]
pub struct GitProviderClient {
    provider: GitProvider,
    base_url: String,
    credentials: GitProviderCredentials,
}

impl GitProviderClient {
    pub fn new(provider: GitProvider, credentials: GitProviderCredentials) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_string(),
            credentials,
        }
    }

    /// Point at a self-hosted instance (GitHub Enterprise, GitLab CE/EE).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn provider(&self) -> GitProvider {
        self.provider
    }

    fn endpoint(&self, path: &str) -> Result<Url, GitProviderError> {
        Ok(Url::parse(&format!("{}{path}", self.base_url))?)
    }

    /// Authorization endpoint URL carrying the S256 challenge of `verifier`.
    /// The verifier itself never appears in this URL.
    ///
    /// `redirect_url` must parse as a URL but is sent exactly as given:
    /// providers compare it byte for byte with the registered callback.
    pub fn authorize_url(
        &self,
        redirect_url: &str,
        scopes: &[&str],
        verifier: &CodeVerifier,
    ) -> Result<Url, GitProviderError> {
        Url::parse(redirect_url)?;
        let mut url = self.endpoint(self.provider.authorize_path())?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("code_challenge", &verifier.code_challenge())
            .append_pair("code_challenge_method", "S256")
            .append_pair("redirect_uri", redirect_url);
        Ok(url)
    }

    /// Token endpoint URL redeeming `code` with the raw `verifier`.
    pub fn token_url(
        &self,
        redirect_url: &str,
        code: &str,
        verifier: &CodeVerifier,
    ) -> Result<Url, GitProviderError> {
        Url::parse(redirect_url)?;
        let mut url = self.endpoint(self.provider.token_path())?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", redirect_url)
            .append_pair("grant_type", "authorization_code")
            .append_pair("code_verifier", verifier.raw_value())
            .append_pair("code", code)
            .append_pair("client_secret", &self.credentials.client_secret);
        Ok(url)
    }

    /// Redeem an authorization code for an access token.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        redirect_url: &str,
        code: &str,
        verifier: &CodeVerifier,
    ) -> Result<GitProviderToken, GitProviderError> {
        let url = self.token_url(redirect_url, code, verifier)?;

        let res = http
            .post(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(GitProviderError::Exchange(format!(
                "{} returned {status}: {text}",
                self.provider
            )));
        }

        let body: TokenEndpointResponse = res.json().await?;
        if let Some(error) = body.error {
            return Err(GitProviderError::Exchange(format!(
                "{error}: {}",
                body.error_description.unwrap_or_default()
            )));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GitProviderError::Exchange("missing access_token".into()))?;

        info!(provider = %self.provider, "git provider token obtained");

        Ok(GitProviderToken {
            access_token,
            token_type: body.token_type,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
        })
    }
}
