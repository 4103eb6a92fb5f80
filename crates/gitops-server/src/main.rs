//! GitOps control-plane API server.
//!
//! Serves the auth routes (OIDC login, local admin sign-in, user info,
//! logout) and the `/v1` API behind the auth middleware.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gitops_auth::config::{
    AdminSecretRef, AuthConfig, DEFAULT_ROUTE_PREFIX, DEFAULT_TOKEN_DURATION, OidcConfig,
};
use gitops_auth::secrets::{AdminPasswordStore, KubeAdminPasswordStore, StaticAdminPasswordStore};
use gitops_auth::server::AuthServer;
use tracing::{info, warn};

mod api;

/// GitOps control-plane API server.
#[derive(Parser, Debug)]
#[command(name = "gitops-server", about = "GitOps control-plane API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "GITOPS_LISTEN", default_value = "0.0.0.0:9001")]
    listen: String,

    /// OIDC issuer URL; leave empty to disable OIDC login.
    #[arg(long, env = "OIDC_ISSUER_URL", default_value = "")]
    oidc_issuer_url: String,

    #[arg(long, env = "OIDC_CLIENT_ID", default_value = "")]
    oidc_client_id: String,

    #[arg(long, env = "OIDC_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    oidc_client_secret: String,

    /// Callback URL registered with the provider.
    #[arg(long, env = "OIDC_REDIRECT_URL", default_value = "")]
    oidc_redirect_url: String,

    /// Session cookie and admin token lifetime, in seconds.
    #[arg(long, env = "OIDC_TOKEN_DURATION", default_value_t = DEFAULT_TOKEN_DURATION.as_secs())]
    oidc_token_duration: u64,

    #[arg(long, env = "AUTH_ROUTE_PREFIX", default_value = DEFAULT_ROUTE_PREFIX)]
    auth_route_prefix: String,

    /// API paths served without authentication (comma separated).
    #[arg(long, env = "PUBLIC_ROUTES", value_delimiter = ',', default_value = "/v1/featureflags")]
    public_routes: Vec<String>,

    #[arg(long, env = "ADMIN_SECRET_NAMESPACE", default_value = "flux-system")]
    admin_secret_namespace: String,

    #[arg(long, env = "ADMIN_SECRET_NAME", default_value = "admin-password-hash")]
    admin_secret_name: String,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            oidc: OidcConfig {
                issuer_url: self.oidc_issuer_url.clone(),
                client_id: self.oidc_client_id.clone(),
                client_secret: self.oidc_client_secret.clone(),
                redirect_url: self.oidc_redirect_url.clone(),
                token_duration: Duration::from_secs(self.oidc_token_duration),
            },
            admin_secret: AdminSecretRef {
                namespace: self.admin_secret_namespace.clone(),
                name: self.admin_secret_name.clone(),
            },
            route_prefix: self.auth_route_prefix.clone(),
        }
    }
}

async fn password_store(secret: AdminSecretRef) -> Arc<dyn AdminPasswordStore> {
    match kube::Client::try_default().await {
        Ok(client) => {
            info!(namespace = %secret.namespace, name = %secret.name, "admin password read from cluster secret");
            Arc::new(KubeAdminPasswordStore::new(client, secret))
        }
        Err(e) => {
            warn!(error = %e, "no Kubernetes client available, local admin login disabled");
            Arc::new(StaticAdminPasswordStore::empty())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.auth_config();

    let passwords = password_store(config.admin_secret.clone()).await;
    let auth = AuthServer::from_config(config, reqwest::Client::new(), passwords)
        .await
        .context("failed to initialise OIDC provider")?;
    let oidc_enabled = auth.oidc_enabled();

    let app = api::app(Arc::new(auth), args.public_routes).context("invalid auth configuration")?;

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    info!(address = %args.listen, oidc_enabled, "gitops server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
