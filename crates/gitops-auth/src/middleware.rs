//! API auth middleware.
//!
//! Wraps a router so that every request either hits a public route or
//! carries a credential one of the principal resolvers accepts.  Accepted
//! requests continue with the [`Principal`] in their extensions; the rest
//! get a 401.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::principal::Principal;
use crate::resolver::{
    AdminCookieResolver, BearerHeaderResolver, IdTokenCookieResolver, MultiResolver,
    PrincipalResolver,
};
use crate::server::{AuthServer, ID_TOKEN_COOKIE};

/// Whether `path` is exactly one of `public_routes`.
pub fn is_public_route(path: &str, public_routes: &[String]) -> bool {
    public_routes.iter().any(|route| route == path)
}

/// Resolver chain and public-route allow-list shared by every request.
pub struct ApiAuth {
    resolver: MultiResolver,
    public_routes: Vec<String>,
}

impl ApiAuth {
    /// The admin-cookie resolver is always present and tried first; the OIDC
    /// header and cookie resolvers are added only when a provider is
    /// configured.
    pub fn new(server: &AuthServer, public_routes: Vec<String>) -> Self {
        let mut resolver =
            MultiResolver::new().with(AdminCookieResolver::new(server.tokens().clone(), ID_TOKEN_COOKIE));

        if let Some(provider) = server.provider() {
            resolver = resolver
                .with(BearerHeaderResolver::new(provider.clone()))
                .with(IdTokenCookieResolver::new(provider.clone(), ID_TOKEN_COOKIE));
        }

        Self {
            resolver,
            public_routes,
        }
    }
}

/// Gate `router` behind principal resolution.
pub fn with_api_auth<S>(router: Router<S>, server: &AuthServer, public_routes: Vec<String>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let auth = Arc::new(ApiAuth::new(server, public_routes));
    router.layer(middleware::from_fn_with_state(auth, require_principal))
}

/// Middleware function behind [`with_api_auth`].
pub async fn require_principal(
    State(auth): State<Arc<ApiAuth>>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_public_route(request.uri().path(), &auth.public_routes) {
        return next.run(request).await;
    }

    match auth.resolver.resolve(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert::<Principal>(principal);
            next.run(request).await
        }
        Err(e) => {
            error!(path = %request.uri().path(), error = %e, "failed to get principal");
            (StatusCode::UNAUTHORIZED, "Authentication required").into_response()
        }
    }
}
