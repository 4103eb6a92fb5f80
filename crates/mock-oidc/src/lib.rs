//! Minimal OpenID Provider for local development and integration tests.
//!
//! Serves discovery, JWKS, an auto-approving authorization endpoint, a token
//! endpoint issuing RS256 ID tokens, and a user-info endpoint.  The
//! authorization code doubles as the user name: `/authorize?login_hint=jane`
//! redirects back with `code=jane`, and the token endpoint issues tokens for
//! `jane@example.com`.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// Key id advertised in the JWKS and stamped on every token.
pub const KEY_ID: &str = "mock-key-1";

/// User issued when the authorization request carries no `login_hint`.
pub const DEFAULT_USER: &str = "dev";

/// Groups every mock user belongs to.
pub const GROUPS: [&str; 2] = ["team-a", "dev"];

const EMAIL_DOMAIN: &str = "example.com";

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("failed to generate signing key: {0}")]
    KeyGen(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct OidcKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_jwk: Value,
}

// RSA generation is slow in debug builds; every provider in the process
// shares one key pair.
static KEYS: OnceLock<Arc<OidcKeys>> = OnceLock::new();

fn keys() -> Result<Arc<OidcKeys>, MockError> {
    if let Some(keys) = KEYS.get() {
        return Ok(keys.clone());
    }

    info!("generating RSA-2048 signing key");
    let mut rng = rand::thread_rng();
    let priv_key =
        RsaPrivateKey::new(&mut rng, 2048).map_err(|e| MockError::KeyGen(e.to_string()))?;
    let pub_key = RsaPublicKey::from(&priv_key);

    let priv_pem = priv_key
        .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| MockError::KeyGen(e.to_string()))?;
    let encoding_key = EncodingKey::from_rsa_pem(priv_pem.as_bytes())
        .map_err(|e| MockError::KeyGen(e.to_string()))?;

    let n = URL_SAFE_NO_PAD.encode(pub_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(pub_key.e().to_bytes_be());
    let decoding_key =
        DecodingKey::from_rsa_components(&n, &e).map_err(|e| MockError::KeyGen(e.to_string()))?;

    let public_jwk = json!({
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "kid": KEY_ID,
        "n": n,
        "e": e
    });

    let generated = Arc::new(OidcKeys {
        encoding_key,
        decoding_key,
        public_jwk,
    });
    Ok(KEYS.get_or_init(|| generated).clone())
}

struct Provider {
    issuer: String,
    keys: Arc<OidcKeys>,
}

/// Routes of a provider whose issuer (and endpoint base URL) is `issuer`.
pub fn router(issuer: impl Into<String>) -> Result<Router, MockError> {
    let provider = Arc::new(Provider {
        issuer: issuer.into().trim_end_matches('/').to_string(),
        keys: keys()?,
    });

    Ok(Router::new()
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .route("/jwks", get(jwks))
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .with_state(provider))
}

/// A provider running in the background on a local ephemeral port.
pub struct MockOidc {
    pub issuer: String,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockOidc {
    /// Bind `127.0.0.1:0` and serve until dropped.
    pub async fn spawn() -> Result<Self, MockError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let issuer = format!("http://{addr}");
        let app = router(issuer.clone())?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "mock-oidc stopped");
            }
        });

        Ok(Self {
            issuer,
            addr,
            handle,
        })
    }
}

impl Drop for MockOidc {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// --- Endpoints ---

async fn openid_configuration(State(provider): State<Arc<Provider>>) -> Json<Value> {
    let issuer = &provider.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/jwks"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "email", "groups", "profile", "offline_access"]
    }))
}

async fn jwks(State(provider): State<Arc<Provider>>) -> Json<Value> {
    Json(json!({
        "keys": [provider.keys.public_jwk.clone()]
    }))
}

#[derive(Deserialize)]
struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: String,
    state: Option<String>,
    login_hint: Option<String>,
}

/// Auto-approve and send the browser straight back with a code.
async fn authorize(Query(params): Query<AuthorizeParams>) -> Response {
    info!(client_id = ?params.client_id, "authorize request");

    let Ok(mut target) = url::Url::parse(&params.redirect_uri) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request");
    };

    let code = params
        .login_hint
        .filter(|hint| !hint.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());
    {
        let mut query = target.query_pairs_mut();
        query.append_pair("code", &code);
        if let Some(state) = &params.state {
            query.append_pair("state", state);
        }
    }

    Redirect::to(target.as_str()).into_response()
}

#[derive(Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: String,
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    aud: String,
    exp: i64,
    iat: i64,
    email: String,
    groups: Vec<String>,
}

async fn token(State(provider): State<Arc<Provider>>, Form(req): Form<TokenRequest>) -> Response {
    info!(code = %req.code, "token request");

    if req.grant_type != "authorization_code" {
        return oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type");
    }
    if req.code.is_empty() {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant");
    }

    let now = Utc::now();
    let claims = Claims {
        iss: provider.issuer.clone(),
        sub: req.code.clone(),
        aud: req.client_id.unwrap_or_default(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
        email: format!("{}@{EMAIL_DOMAIN}", req.code.to_lowercase()),
        groups: GROUPS.iter().map(ToString::to_string).collect(),
    };

    let header = Header {
        kid: Some(KEY_ID.to_string()),
        alg: Algorithm::RS256,
        ..Default::default()
    };

    // The access token is the same JWT so user-info can verify it offline.
    let id_token = match encode(&header, &claims, &provider.keys.encoding_key) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "failed to sign token");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error");
        }
    };

    Json(json!({
        "access_token": id_token,
        "id_token": id_token,
        "refresh_token": format!("refresh-{}", uuid::Uuid::new_v4()),
        "token_type": "Bearer",
        "expires_in": 3600
    }))
    .into_response()
}

async fn userinfo(State(provider): State<Arc<Provider>>, headers: HeaderMap) -> Response {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_token");
    };

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[provider.issuer.as_str()]);
    validation.validate_aud = false;

    match decode::<Claims>(token, &provider.keys.decoding_key, &validation) {
        Ok(data) => Json(json!({
            "sub": data.claims.sub,
            "email": data.claims.email,
            "groups": data.claims.groups,
        }))
        .into_response(),
        Err(e) => {
            info!(error = %e, "rejected userinfo token");
            oauth_error(StatusCode::UNAUTHORIZED, "invalid_token")
        }
    }
}

fn oauth_error(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}
