//! Error types for the control-plane auth routes.
//!
//! [`AuthError`] is the boundary error of every auth handler.  It carries the
//! failure class (configuration, protocol violation, invalid credential,
//! upstream or internal failure) and implements
//! [`axum::response::IntoResponse`] so handlers can return
//! `Result<…, AuthError>` directly.
//!
//! Component-level errors (`TokenError`, `OidcError`, …) live next to the
//! component that produces them and are mapped onto an [`AuthError`] by the
//! handler that detects them, never further down the call chain.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors surfaced to HTTP callers of the auth routes.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// An OIDC-only route was hit while no identity provider is configured.
    #[error("{0}")]
    NotConfigured(String),

    /// The request violated the protocol: missing parameter, CSRF mismatch,
    /// malformed state or body.
    #[error("{0}")]
    BadRequest(String),

    /// The presented credential was rejected.
    #[error("{0}")]
    Unauthorized(String),

    /// The identity provider could not complete the request.
    #[error("{0}")]
    Upstream(String),

    /// Marshalling, signing or secret read failures.
    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status code associated with this failure class.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "auth request failed");
        } else {
            tracing::info!(%status, error = %message, "auth request rejected");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
