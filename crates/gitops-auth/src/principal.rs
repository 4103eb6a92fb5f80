//! The authenticated caller.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

/// Identity of an authenticated caller: subject plus group memberships.
///
/// Built only by a resolver after its credential verified successfully, then
/// attached to the request's extensions by the API auth middleware.  It lives
/// exactly as long as the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: String,
    groups: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            id: id.into(),
            groups,
        }
    }

    /// Subject identifier: an email address or the OIDC `sub`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

/// Downstream handlers behind the API auth middleware take `Principal` as an
/// extractor.  Reaching such a handler without the middleware is a wiring bug
/// and answers 401 rather than serving an anonymous caller.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}
