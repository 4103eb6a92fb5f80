//! Auth server configuration.
//!
//! Plain data structs, constructed once at startup by the host binary and
//! moved into the [`AuthServer`](crate::server::AuthServer).  Nothing here
//! reads the environment; the binary decides where values come from.

use std::time::Duration;

/// Default mount point of the auth routes.
pub const DEFAULT_ROUTE_PREFIX: &str = "/oauth2";

/// Default lifetime of the `id_token` / `refresh_token` cookies and of
/// locally signed admin tokens.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(60 * 60);

/// Parameters of the external OpenID Provider.
///
/// OIDC is considered disabled when `issuer_url` is empty; only the local
/// admin login is available in that case.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Issuer URL, used for discovery (e.g. `https://dex.example.com`).
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Callback URL registered with the provider (`…/oauth2/callback`).
    pub redirect_url: String,
    /// Lifetime of the session cookies issued after login.
    pub token_duration: Duration,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            token_duration: DEFAULT_TOKEN_DURATION,
        }
    }
}

impl OidcConfig {
    /// Whether an identity provider has been configured.
    pub fn enabled(&self) -> bool {
        !self.issuer_url.is_empty()
    }
}

/// Location of the cluster secret holding the bcrypt admin password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSecretRef {
    pub namespace: String,
    pub name: String,
}

impl Default for AdminSecretRef {
    fn default() -> Self {
        Self {
            namespace: "flux-system".to_string(),
            name: "admin-password-hash".to_string(),
        }
    }
}

/// Global configuration of the auth server.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub oidc: OidcConfig,
    pub admin_secret: AdminSecretRef,
    /// Prefix under which the auth routes are mounted (default `/oauth2`).
    pub route_prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oidc: OidcConfig::default(),
            admin_secret: AdminSecretRef::default(),
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
        }
    }
}

impl AuthConfig {
    /// The route prefix with its trailing `/` removed.
    ///
    /// The prefix must start with `/` and name at least one non-empty path
    /// segment free of router syntax (`{`, `}`, `*`, `:`).
    pub fn validated_route_prefix(&self) -> Result<&str, ConfigError> {
        let prefix = self.route_prefix.trim_end_matches('/');
        let invalid = || ConfigError::InvalidRoutePrefix(self.route_prefix.clone());

        let segments = prefix.strip_prefix('/').ok_or_else(invalid)?;
        if segments.is_empty() {
            return Err(invalid());
        }
        for segment in segments.split('/') {
            if segment.is_empty()
                || segment.contains(['{', '}', '*', ':', '?', '#'])
                || segment.contains(char::is_whitespace)
            {
                return Err(invalid());
            }
        }
        Ok(prefix)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid route prefix {0:?}: expected an absolute path such as `/oauth2`")]
    InvalidRoutePrefix(String),
}

/// OAuth application credentials registered with a git hosting provider.
#[derive(Debug, Clone, Default)]
pub struct GitProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}
