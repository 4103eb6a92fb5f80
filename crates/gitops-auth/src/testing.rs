//! In-memory identity provider for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::oidc::{IdTokenClaims, IdentityProvider, OidcError, TokenResponse, UserInfoClaims};

#[derive(Default)]
pub(crate) struct FakeProvider {
    id_tokens: HashMap<String, IdTokenClaims>,
    user_infos: HashMap<String, UserInfoClaims>,
    token_response: Option<TokenResponse>,
    exchange_calls: AtomicUsize,
}

impl FakeProvider {
    /// Accept `raw` as a valid ID token for `email`.
    pub(crate) fn with_id_token(mut self, raw: &str, email: &str, groups: &[&str]) -> Self {
        self.id_tokens.insert(
            raw.to_string(),
            IdTokenClaims {
                sub: format!("sub-{email}"),
                email: Some(email.to_string()),
                groups: groups.iter().map(ToString::to_string).collect(),
            },
        );
        self
    }

    /// Answer user-info queries for `access_token` with `email`.
    pub(crate) fn with_user_info(mut self, access_token: &str, email: &str) -> Self {
        self.user_infos.insert(
            access_token.to_string(),
            UserInfoClaims {
                sub: format!("sub-{email}"),
                email: email.to_string(),
                groups: Vec::new(),
            },
        );
        self
    }

    /// Make the token endpoint return these tokens.
    pub(crate) fn with_token_response(
        mut self,
        id_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Self {
        self.token_response = Some(TokenResponse {
            access_token: "access".to_string(),
            token_type: Some("Bearer".to_string()),
            id_token: id_token.map(ToString::to_string),
            refresh_token: refresh_token.map(ToString::to_string),
            expires_in: Some(3600),
        });
        self
    }

    pub(crate) fn exchanges(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_url(&self, state: &str, scopes: &[String]) -> String {
        let mut url = url::Url::parse("https://idp.example.com/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("client_id", "gitops")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.token_response
            .clone()
            .ok_or_else(|| OidcError::Exchange(format!("unknown code {code}")))
    }

    async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, OidcError> {
        self.id_tokens
            .get(raw)
            .cloned()
            .ok_or_else(|| OidcError::InvalidToken("signature mismatch".into()))
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfoClaims, OidcError> {
        self.user_infos
            .get(access_token)
            .cloned()
            .ok_or_else(|| OidcError::UserInfo("provider returned 401 Unauthorized".into()))
    }
}
