//! Principal resolution.
//!
//! Each resolver turns one credential shape into a [`Principal`]:
//!
//! | Resolver                  | Credential                                   |
//! |---------------------------|----------------------------------------------|
//! | [`AdminCookieResolver`]   | locally signed admin token in `id_token` cookie |
//! | [`BearerHeaderResolver`]  | OIDC ID token in `Authorization: Bearer …`   |
//! | [`IdTokenCookieResolver`] | OIDC ID token in `id_token` cookie           |
//!
//! [`MultiResolver`] tries them in order and returns the first success.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::oidc::{IdentityProvider, OidcError};
use crate::principal::Principal;
use crate::token::{HmacTokenSignerVerifier, TokenError};

#[derive(Debug, thiserror::Error)]
pub enum PrincipalError {
    #[error("no {0} credential present")]
    Missing(&'static str),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Oidc(#[from] OidcError),

    /// Every resolver failed.  Deliberately carries no detail.
    #[error("no principal could be resolved")]
    NoPrincipal,
}

/// Produces a [`Principal`] from the credential carried by a request.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, PrincipalError>;
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Verifies the local admin token held in a cookie.
pub struct AdminCookieResolver {
    tokens: Arc<HmacTokenSignerVerifier>,
    cookie_name: String,
}

impl AdminCookieResolver {
    pub fn new(tokens: Arc<HmacTokenSignerVerifier>, cookie_name: impl Into<String>) -> Self {
        Self {
            tokens,
            cookie_name: cookie_name.into(),
        }
    }
}

#[async_trait]
impl PrincipalResolver for AdminCookieResolver {
    fn name(&self) -> &'static str {
        "admin-cookie"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, PrincipalError> {
        let token =
            cookie_value(headers, &self.cookie_name).ok_or(PrincipalError::Missing("cookie"))?;
        let claims = self.tokens.verify(&token)?;
        Ok(Principal::new(claims.sub, Vec::new()))
    }
}

/// Verifies an OIDC ID token presented as a bearer token.
pub struct BearerHeaderResolver {
    provider: Arc<dyn IdentityProvider>,
}

impl BearerHeaderResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PrincipalResolver for BearerHeaderResolver {
    fn name(&self) -> &'static str {
        "oidc-header"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, PrincipalError> {
        let token = bearer_token(headers).ok_or(PrincipalError::Missing("bearer"))?;
        let claims = self.provider.verify_id_token(token).await?;
        Ok(claims.into_principal())
    }
}

/// Verifies an OIDC ID token held in a cookie.
pub struct IdTokenCookieResolver {
    provider: Arc<dyn IdentityProvider>,
    cookie_name: String,
}

impl IdTokenCookieResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>, cookie_name: impl Into<String>) -> Self {
        Self {
            provider,
            cookie_name: cookie_name.into(),
        }
    }
}

#[async_trait]
impl PrincipalResolver for IdTokenCookieResolver {
    fn name(&self) -> &'static str {
        "oidc-cookie"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, PrincipalError> {
        let token =
            cookie_value(headers, &self.cookie_name).ok_or(PrincipalError::Missing("cookie"))?;
        let claims = self.provider.verify_id_token(&token).await?;
        Ok(claims.into_principal())
    }
}

/// Ordered first-success composition of resolvers.
#[derive(Default)]
pub struct MultiResolver {
    resolvers: Vec<Box<dyn PrincipalResolver>>,
}

impl MultiResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, resolver: impl PrincipalResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.resolvers.len()
    }
}

#[async_trait]
impl PrincipalResolver for MultiResolver {
    fn name(&self) -> &'static str {
        "multi"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, PrincipalError> {
        for resolver in &self.resolvers {
            match resolver.resolve(headers).await {
                Ok(principal) => {
                    debug!(resolver = resolver.name(), principal = %principal.id(), "principal resolved");
                    return Ok(principal);
                }
                Err(PrincipalError::Missing(_)) => {}
                Err(e) => debug!(resolver = resolver.name(), error = %e, "resolver rejected credential"),
            }
        }

        warn!("no resolver produced a principal");
        Err(PrincipalError::NoPrincipal)
    }
}
