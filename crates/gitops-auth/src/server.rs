//! Auth server: OIDC authorization-code flow, local admin sign-in,
//! user info and logout.
//!
//! Routes, relative to the configured prefix (default `/oauth2`):
//!
//! | Method | Path         | Handler                          |
//! |--------|--------------|----------------------------------|
//! | GET    | ``           | start the OIDC flow (303)        |
//! | GET    | `/callback`  | OIDC redirect target (303)       |
//! | POST   | `/sign_in`   | local admin password login       |
//! | GET    | `/userinfo`  | identity behind `id_token`       |
//! | POST   | `/logout`    | clear the session cookies        |
//!
//! Any other method on these paths is answered with 405 and an `Allow`
//! header by the method router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::{AuthConfig, ConfigError};
use crate::error::AuthError;
use crate::oidc::{IdentityProvider, OidcError, OidcProvider};
use crate::secrets::AdminPasswordStore;
use crate::state::SessionState;
use crate::token::HmacTokenSignerVerifier;

/// Cookie holding the CSRF state during the OIDC flow.
pub const STATE_COOKIE: &str = "state";
/// Cookie holding either a local admin token or an OIDC ID token.
pub const ID_TOKEN_COOKIE: &str = "id_token";
/// Cookie holding the OIDC refresh token, when the provider issues one.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Lifetime of the `state` cookie: one login round trip.
pub const STATE_COOKIE_TTL: Duration = Duration::from_secs(10 * 60);

const SCOPE_PROFILE: &str = "profile";
const SCOPE_OPENID: &str = "openid";
const SCOPE_OFFLINE_ACCESS: &str = "offline_access";
const SCOPE_EMAIL: &str = "email";
const SCOPE_GROUPS: &str = "groups";

/// Requested scopes plus the ones the flow always needs: `openid`,
/// `offline_access` (refresh tokens), `email` and `groups`.
pub fn oauth2_scopes(requested: &[&str]) -> Vec<String> {
    let mut scopes: Vec<String> = requested.iter().map(ToString::to_string).collect();
    for required in [SCOPE_OPENID, SCOPE_OFFLINE_ACCESS, SCOPE_EMAIL, SCOPE_GROUPS] {
        if !scopes.iter().any(|s| s == required) {
            scopes.push(required.to_string());
        }
    }
    scopes
}

/// Body of `POST {prefix}/sign_in`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Response of `GET {prefix}/userinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FlowParams {
    return_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Shared state of the auth routes.
///
/// Owns the process-lifetime token signer; nothing else in here changes
/// after construction, so one instance serves any number of concurrent
/// requests behind an `Arc`.
pub struct AuthServer {
    config: AuthConfig,
    provider: Option<Arc<dyn IdentityProvider>>,
    passwords: Arc<dyn AdminPasswordStore>,
    tokens: Arc<HmacTokenSignerVerifier>,
}

impl AuthServer {
    pub fn new(
        config: AuthConfig,
        provider: Option<Arc<dyn IdentityProvider>>,
        passwords: Arc<dyn AdminPasswordStore>,
        tokens: Arc<HmacTokenSignerVerifier>,
    ) -> Self {
        Self {
            config,
            provider,
            passwords,
            tokens,
        }
    }

    /// Build a server from configuration, running OIDC discovery when an
    /// issuer is configured and generating a fresh token-signing secret.
    pub async fn from_config(
        config: AuthConfig,
        http: reqwest::Client,
        passwords: Arc<dyn AdminPasswordStore>,
    ) -> Result<Self, OidcError> {
        let provider: Option<Arc<dyn IdentityProvider>> = if config.oidc.enabled() {
            Some(Arc::new(OidcProvider::discover(http, &config.oidc).await?))
        } else {
            info!("no OIDC issuer configured, only local admin login is available");
            None
        };
        let tokens = Arc::new(HmacTokenSignerVerifier::new(config.oidc.token_duration));

        Ok(Self::new(config, provider, passwords, tokens))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn oidc_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&Arc<dyn IdentityProvider>> {
        self.provider.as_ref()
    }

    pub fn tokens(&self) -> &Arc<HmacTokenSignerVerifier> {
        &self.tokens
    }

    fn require_provider(&self) -> Result<&Arc<dyn IdentityProvider>, AuthError> {
        self.provider
            .as_ref()
            .ok_or_else(|| AuthError::NotConfigured("oidc provider not configured".into()))
    }

    fn secure_cookies(&self) -> bool {
        self.config.oidc.redirect_url.starts_with("https://")
    }

    fn create_cookie(&self, name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies())
            .same_site(SameSite::Lax)
            .expires(OffsetDateTime::now_utc() + ttl)
            .build()
    }

    fn session_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        self.create_cookie(name, value, self.config.oidc.token_duration)
    }
}

fn clear_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Mount the auth routes under `server.config().route_prefix`.
pub fn routes(server: Arc<AuthServer>) -> Result<Router, ConfigError> {
    let prefix = server.config.validated_route_prefix()?.to_string();

    Ok(Router::new()
        .route(&prefix, get(oauth2_flow))
        .route(&format!("{prefix}/callback"), get(callback))
        .route(&format!("{prefix}/sign_in"), post(sign_in))
        .route(&format!("{prefix}/userinfo"), get(user_info))
        .route(&format!("{prefix}/logout"), post(logout))
        .with_state(server))
}

/// `GET {prefix}`: start the OIDC authorization-code flow.
async fn oauth2_flow(
    State(server): State<Arc<AuthServer>>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<FlowParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let provider = server.require_provider()?;

    let return_url = params
        .return_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| uri.path_and_query().map_or("/", |p| p.as_str()).to_string());

    let state = SessionState::new(return_url)
        .encode()
        .map_err(|e| AuthError::Internal(format!("failed to encode state: {e}")))?;

    let scopes = oauth2_scopes(&[SCOPE_PROFILE]);
    let authorize_url = provider.authorization_url(&state, &scopes);

    info!("starting OIDC authorization flow");
    let jar = jar.add(server.create_cookie(STATE_COOKIE, state, STATE_COOKIE_TTL));
    Ok((jar, Redirect::to(&authorize_url)))
}

/// `GET {prefix}/callback`: the provider's redirect back to us.
///
/// The `state` cookie is cleared whatever the outcome.
async fn callback(
    State(server): State<Arc<AuthServer>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let outcome = match params {
        Ok(Query(params)) => complete_flow(&server, params, &jar).await,
        Err(e) => Err(AuthError::BadRequest(format!(
            "invalid callback parameters: {}",
            e.body_text()
        ))),
    };

    match outcome {
        Ok((cookies, return_url)) => {
            let jar = cookies
                .into_iter()
                .fold(jar, |jar, cookie| jar.add(cookie))
                .add(clear_cookie(STATE_COOKIE));
            (jar, Redirect::to(&return_url)).into_response()
        }
        Err(e) => (jar.add(clear_cookie(STATE_COOKIE)), e).into_response(),
    }
}

/// Validate the callback and exchange the code.  Returns the session cookies
/// to issue and the URL to send the browser back to.
async fn complete_flow(
    server: &AuthServer,
    params: CallbackParams,
    jar: &CookieJar,
) -> Result<(Vec<Cookie<'static>>, String), AuthError> {
    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        info!(
            %error,
            error_description = params.error_description.as_deref().unwrap_or_default(),
            "authorization redirect reported a failure"
        );
        return Err(AuthError::BadRequest(format!(
            "identity provider returned error: {error}"
        )));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::BadRequest("missing authorization code".into()))?;

    let cookie = jar
        .get(STATE_COOKIE)
        .ok_or_else(|| AuthError::BadRequest("missing state cookie".into()))?;

    if params.state.as_deref() != Some(cookie.value()) {
        warn!("state parameter does not match state cookie");
        return Err(AuthError::BadRequest("state mismatch".into()));
    }

    let state = SessionState::decode(cookie.value())
        .map_err(|e| AuthError::BadRequest(e.to_string()))?;

    let provider = server.require_provider()?;

    let tokens = provider
        .exchange_code(&code)
        .await
        .map_err(|e| AuthError::Upstream(e.to_string()))?;

    let id_token = tokens
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::Upstream("no id_token in token response".into()))?;

    let claims = provider
        .verify_id_token(&id_token)
        .await
        .map_err(|e| AuthError::Upstream(format!("failed to verify ID token: {e}")))?;

    info!(subject = %claims.sub, "OIDC login successful");

    let mut cookies = vec![server.session_cookie(ID_TOKEN_COOKIE, id_token)];
    if let Some(refresh) = tokens.refresh_token.filter(|t| !t.is_empty()) {
        cookies.push(server.session_cookie(REFRESH_TOKEN_COOKIE, refresh));
    }

    Ok((cookies, state.return_url))
}

/// `POST {prefix}/sign_in`: local admin login with the cluster-stored
/// bcrypt password hash.
async fn sign_in(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, StatusCode), AuthError> {
    let login: LoginRequest = serde_json::from_slice(&body)
        .map_err(|e| AuthError::BadRequest(format!("failed to read request body: {e}")))?;

    let hash = server.passwords.password_hash().await.map_err(|e| {
        if e.is_not_configured() {
            warn!(error = %e, "admin password hash not found");
            AuthError::BadRequest("no password configured".into())
        } else {
            AuthError::Internal(e.to_string())
        }
    })?;

    let matches = tokio::task::spawn_blocking(move || {
        let hash = String::from_utf8_lossy(&hash);
        bcrypt::verify(login.password, hash.trim())
    })
    .await
    .map_err(|e| AuthError::Internal(format!("password check aborted: {e}")))?;

    match matches {
        Ok(true) => {}
        Ok(false) => return Err(AuthError::Unauthorized("invalid password".into())),
        Err(e) => {
            error!(error = %e, "failed to compare password with stored hash");
            return Err(AuthError::Unauthorized("invalid password".into()));
        }
    }

    let signed = server
        .tokens
        .sign()
        .map_err(|e| AuthError::Internal(e.to_string()))?;

    info!("local admin signed in");
    Ok((jar.add(server.session_cookie(ID_TOKEN_COOKIE, signed)), StatusCode::OK))
}

/// `GET {prefix}/userinfo`: describe the identity behind `id_token`.
///
/// A local admin token is tried first.  Otherwise the cookie value is
/// presented to the provider's user-info endpoint as an access token, which
/// keeps the cookie dual-purpose for compatibility with existing clients.
async fn user_info(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
) -> Result<Json<UserInfo>, AuthError> {
    let cookie = jar
        .get(ID_TOKEN_COOKIE)
        .ok_or_else(|| AuthError::BadRequest("missing id_token cookie".into()))?;

    if let Ok(claims) = server.tokens.verify(cookie.value()) {
        return Ok(Json(UserInfo {
            email: claims.sub,
            groups: Vec::new(),
        }));
    }

    let provider = server
        .provider
        .as_ref()
        .ok_or_else(|| AuthError::Unauthorized("invalid session".into()))?;

    let info = provider.user_info(cookie.value()).await.map_err(|e| {
        AuthError::Unauthorized(format!("failed to query user info endpoint: {e}"))
    })?;

    Ok(Json(UserInfo {
        email: info.email,
        groups: info.groups,
    }))
}

/// `POST {prefix}/logout`: clear the session cookies.  Tokens are not
/// revoked at the provider.
async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let jar = jar
        .add(clear_cookie(ID_TOKEN_COOKIE))
        .add(clear_cookie(REFRESH_TOKEN_COOKIE));
    (jar, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::http::header::{ALLOW, LOCATION};
    use axum_test::TestServer;
    use serde_json::json;

    use super::*;
    use crate::secrets::StaticAdminPasswordStore;
    use crate::testing::FakeProvider;

    const PASSWORD: &str = "correct horse";

    fn build(provider: Option<Arc<dyn IdentityProvider>>, passwords: StaticAdminPasswordStore) -> TestServer {
        let server = AuthServer::new(
            AuthConfig::default(),
            provider,
            Arc::new(passwords),
            Arc::new(HmacTokenSignerVerifier::new(Duration::from_secs(300))),
        );
        TestServer::new(routes(Arc::new(server)).unwrap()).unwrap()
    }

    fn with_provider(provider: Arc<FakeProvider>) -> TestServer {
        build(
            Some(provider as Arc<dyn IdentityProvider>),
            StaticAdminPasswordStore::empty(),
        )
    }

    fn with_password() -> TestServer {
        let hash = bcrypt::hash(PASSWORD, 4).unwrap();
        build(None, StaticAdminPasswordStore::new(hash))
    }

    fn location_params(res: &axum_test::TestResponse) -> HashMap<String, String> {
        let location = res.header(LOCATION);
        let url = url::Url::parse(location.to_str().unwrap()).unwrap();
        url.query_pairs().into_owned().collect()
    }

    /// Response cookies come back percent-encoded.
    fn cookie_value(res: &axum_test::TestResponse, name: &str) -> String {
        let raw = res.cookie(name);
        Cookie::parse_encoded(format!("{}={}", raw.name(), raw.value()))
            .unwrap()
            .value()
            .to_string()
    }

    fn state_for(return_url: &str) -> String {
        SessionState::new(return_url).encode().unwrap()
    }

    #[test]
    fn required_scopes_are_appended_once() {
        let scopes = oauth2_scopes(&["profile", "email"]);
        assert_eq!(scopes, ["profile", "email", "openid", "offline_access", "groups"]);
    }

    #[tokio::test]
    async fn flow_without_provider_is_bad_request() {
        let res = build(None, StaticAdminPasswordStore::empty()).get("/oauth2").await;

        res.assert_status(StatusCode::BAD_REQUEST);
        res.assert_json(&json!({"error": "oidc provider not configured"}));
    }

    #[tokio::test]
    async fn flow_redirects_to_provider_with_state_cookie() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server
            .get("/oauth2")
            .add_query_param("return_url", "/applications")
            .await;

        res.assert_status(StatusCode::SEE_OTHER);
        let params = location_params(&res);
        let mut scopes: Vec<&str> = params["scope"].split(' ').collect();
        scopes.sort_unstable();
        assert_eq!(scopes, ["email", "groups", "offline_access", "openid", "profile"]);

        let cookie = res.cookie(STATE_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));

        let value = cookie_value(&res, STATE_COOKIE);
        assert_eq!(params["state"], value);
        let state = SessionState::decode(&value).unwrap();
        assert_eq!(state.return_url, "/applications");
    }

    #[tokio::test]
    async fn flow_defaults_return_url_to_request_uri() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server.get("/oauth2").await;

        let state = SessionState::decode(&cookie_value(&res, STATE_COOKIE)).unwrap();
        assert_eq!(state.return_url, "/oauth2");
    }

    #[tokio::test]
    async fn callback_with_provider_error_is_bad_request() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server
            .get("/oauth2/callback")
            .add_query_param("error", "access_denied")
            .add_query_param("error_description", "user said no")
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(res.cookie(STATE_COOKIE).value(), "");
    }

    #[tokio::test]
    async fn callback_without_code_is_bad_request() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server.get("/oauth2/callback").await;

        res.assert_status(StatusCode::BAD_REQUEST);
        res.assert_json(&json!({"error": "missing authorization code"}));
    }

    #[tokio::test]
    async fn callback_without_state_cookie_is_bad_request() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server
            .get("/oauth2/callback")
            .add_query_param("code", "abc")
            .add_query_param("state", state_for("/"))
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        res.assert_json(&json!({"error": "missing state cookie"}));
    }

    #[tokio::test]
    async fn callback_state_mismatch_never_exchanges_code() {
        let provider = Arc::new(FakeProvider::default().with_token_response(Some("idt"), None));
        let server = with_provider(provider.clone());

        let res = server
            .get("/oauth2/callback")
            .add_query_param("code", "abc")
            .add_query_param("state", state_for("/a"))
            .add_cookie(Cookie::new(STATE_COOKIE, state_for("/b")))
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        res.assert_json(&json!({"error": "state mismatch"}));
        assert_eq!(provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn callback_with_undecodable_state_is_bad_request() {
        let provider = Arc::new(FakeProvider::default());
        let server = with_provider(provider.clone());

        let res = server
            .get("/oauth2/callback")
            .add_query_param("code", "abc")
            .add_query_param("state", "not-base64!")
            .add_cookie(Cookie::new(STATE_COOKIE, "not-base64!"))
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(provider.exchanges(), 0);
    }

    async fn callback_outcome(provider: FakeProvider) -> axum_test::TestResponse {
        let state = state_for("/dashboard");
        with_provider(Arc::new(provider))
            .get("/oauth2/callback")
            .add_query_param("code", "abc")
            .add_query_param("state", &state)
            .add_cookie(Cookie::new(STATE_COOKIE, state))
            .await
    }

    #[tokio::test]
    async fn callback_exchange_failure_is_internal_error() {
        let res = callback_outcome(FakeProvider::default()).await;
        res.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.cookie(STATE_COOKIE).value(), "");
    }

    #[tokio::test]
    async fn callback_without_id_token_is_internal_error() {
        let res = callback_outcome(FakeProvider::default().with_token_response(None, None)).await;
        res.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        res.assert_json(&json!({"error": "no id_token in token response"}));
    }

    #[tokio::test]
    async fn callback_with_unverifiable_id_token_is_internal_error() {
        let res =
            callback_outcome(FakeProvider::default().with_token_response(Some("forged"), None)).await;
        res.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.maybe_cookie(ID_TOKEN_COOKIE).is_none());
    }

    #[tokio::test]
    async fn callback_success_sets_session_cookies() {
        let provider = FakeProvider::default()
            .with_token_response(Some("idt"), Some("rt"))
            .with_id_token("idt", "jane@example.com", &["ops"]);
        let res = callback_outcome(provider).await;

        res.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(res.header(LOCATION), "/dashboard");
        assert_eq!(res.cookie(ID_TOKEN_COOKIE).value(), "idt");
        assert_eq!(res.cookie(REFRESH_TOKEN_COOKIE).value(), "rt");
        assert_eq!(res.cookie(STATE_COOKIE).value(), "");
    }

    #[tokio::test]
    async fn sign_in_rejects_malformed_body() {
        let res = with_password().post("/oauth2/sign_in").text("{password:").await;
        res.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sign_in_without_configured_password_is_bad_request() {
        let res = build(None, StaticAdminPasswordStore::empty())
            .post("/oauth2/sign_in")
            .json(&json!({"password": PASSWORD}))
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        res.assert_json(&json!({"error": "no password configured"}));
    }

    #[tokio::test]
    async fn sign_in_with_wrong_password_is_unauthorized() {
        let res = with_password()
            .post("/oauth2/sign_in")
            .json(&json!({"password": "wrong"}))
            .await;

        res.assert_status(StatusCode::UNAUTHORIZED);
        assert!(res.maybe_cookie(ID_TOKEN_COOKIE).is_none());
    }

    #[tokio::test]
    async fn sign_in_sets_admin_token_cookie() {
        let res = with_password()
            .post("/oauth2/sign_in")
            .json(&json!({"password": PASSWORD}))
            .await;

        res.assert_status_ok();
        let cookie = res.cookie(ID_TOKEN_COOKIE);
        assert!(!cookie.value().is_empty());
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[tokio::test]
    async fn sign_in_only_accepts_post() {
        let res = with_password().get("/oauth2/sign_in").await;

        res.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert!(res.header(ALLOW).to_str().unwrap().contains("POST"));
    }

    #[tokio::test]
    async fn user_info_requires_cookie() {
        let res = with_password().get("/oauth2/userinfo").await;
        res.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_info_describes_local_admin() {
        let server = with_password();
        let login = server
            .post("/oauth2/sign_in")
            .json(&json!({"password": PASSWORD}))
            .await;
        let token = login.cookie(ID_TOKEN_COOKIE);

        let res = server
            .get("/oauth2/userinfo")
            .add_cookie(Cookie::new(ID_TOKEN_COOKIE, token.value().to_string()))
            .await;

        res.assert_status_ok();
        res.assert_json(&json!({"email": "admin", "groups": []}));
    }

    #[tokio::test]
    async fn user_info_falls_back_to_provider() {
        let provider = FakeProvider::default().with_user_info("at-123", "jane@example.com");
        let res = with_provider(Arc::new(provider))
            .get("/oauth2/userinfo")
            .add_cookie(Cookie::new(ID_TOKEN_COOKIE, "at-123"))
            .await;

        res.assert_status_ok();
        res.assert_json(&json!({"email": "jane@example.com", "groups": []}));
    }

    #[tokio::test]
    async fn user_info_with_unknown_token_is_unauthorized() {
        let res = with_provider(Arc::new(FakeProvider::default()))
            .get("/oauth2/userinfo")
            .add_cookie(Cookie::new(ID_TOKEN_COOKIE, "stale"))
            .await;
        res.assert_status(StatusCode::UNAUTHORIZED);

        let res = with_password()
            .get("/oauth2/userinfo")
            .add_cookie(Cookie::new(ID_TOKEN_COOKIE, "stale"))
            .await;
        res.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_clears_session_cookies() {
        let res = with_password()
            .post("/oauth2/logout")
            .add_cookie(Cookie::new(ID_TOKEN_COOKIE, "whatever"))
            .await;

        res.assert_status_ok();
        assert_eq!(res.cookie(ID_TOKEN_COOKIE).value(), "");
        assert_eq!(res.cookie(REFRESH_TOKEN_COOKIE).value(), "");
    }

    #[tokio::test]
    async fn logout_only_accepts_post() {
        let res = with_password().get("/oauth2/logout").await;
        res.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn flow_return_url_keeps_query_but_not_origin() {
        let server = with_provider(Arc::new(FakeProvider::default()));
        let res = server.get("/oauth2").add_query_param("tab", "sources").await;

        let state = SessionState::decode(&cookie_value(&res, STATE_COOKIE)).unwrap();
        assert_eq!(state.return_url, "/oauth2?tab=sources");
    }

    #[tokio::test]
    async fn callback_only_accepts_get() {
        let res = with_provider(Arc::new(FakeProvider::default()))
            .post("/oauth2/callback")
            .await;

        res.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert!(res.header(ALLOW).to_str().unwrap().contains("GET"));
    }

    #[tokio::test]
    async fn user_info_only_accepts_get() {
        let res = with_password().post("/oauth2/userinfo").await;

        res.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert!(res.header(ALLOW).to_str().unwrap().contains("GET"));
    }

    #[tokio::test]
    async fn callback_with_unparseable_query_clears_state() {
        let provider = Arc::new(FakeProvider::default().with_token_response(Some("idt"), None));
        let state = state_for("/");

        let res = with_provider(provider.clone())
            .get("/oauth2/callback")
            .add_query_param("code", "a")
            .add_query_param("code", "b")
            .add_query_param("state", &state)
            .add_cookie(Cookie::new(STATE_COOKIE, state.clone()))
            .await;

        res.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = res.json();
        assert!(body["error"].as_str().unwrap().starts_with("invalid callback parameters"));
        assert_eq!(res.cookie(STATE_COOKIE).value(), "");
        assert_eq!(provider.exchanges(), 0);
    }

    #[test]
    fn unroutable_prefix_is_reported_not_mounted() {
        let config = AuthConfig {
            route_prefix: "/".to_string(),
            ..AuthConfig::default()
        };
        let server = AuthServer::new(
            config,
            None,
            Arc::new(StaticAdminPasswordStore::empty()),
            Arc::new(HmacTokenSignerVerifier::new(Duration::from_secs(300))),
        );

        assert!(matches!(
            routes(Arc::new(server)),
            Err(ConfigError::InvalidRoutePrefix(_))
        ));
    }
}
