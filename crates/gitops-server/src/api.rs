//! HTTP surface of the control plane: auth routes plus the `/v1` API.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use gitops_auth::Principal;
use gitops_auth::config::ConfigError;
use gitops_auth::middleware::with_api_auth;
use gitops_auth::server::{self, AuthServer};
use serde::Serialize;

/// Features the UI toggles on, reported before the user has logged in.
#[derive(Debug, Clone, Serialize)]
struct FeatureFlags {
    #[serde(rename = "OIDC_AUTH")]
    oidc_auth: bool,
    #[serde(rename = "CLUSTER_USER_AUTH")]
    cluster_user_auth: bool,
}

#[derive(Debug, Serialize)]
struct FeatureFlagsResponse {
    flags: FeatureFlags,
}

/// Assemble the full application router.
///
/// Auth routes are always reachable; everything under the API router sits
/// behind the auth middleware except `public_routes`.
pub fn app(auth: Arc<AuthServer>, public_routes: Vec<String>) -> Result<Router, ConfigError> {
    let flags = FeatureFlags {
        oidc_auth: auth.oidc_enabled(),
        cluster_user_auth: true,
    };

    let api = Router::new()
        .route("/v1/featureflags", get(feature_flags))
        .route("/v1/me", get(me))
        .fallback(not_found)
        .with_state(Arc::new(flags));

    Ok(server::routes(auth.clone())?.merge(with_api_auth(api, &auth, public_routes)))
}

async fn feature_flags(State(flags): State<Arc<FeatureFlags>>) -> Json<FeatureFlagsResponse> {
    Json(FeatureFlagsResponse {
        flags: flags.as_ref().clone(),
    })
}

async fn me(principal: Principal) -> Json<Principal> {
    Json(principal)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
