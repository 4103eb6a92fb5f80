//! Authentication and authorization for the GitOps control-plane API.
//!
//! The crate covers three concerns:
//!
//! 1. **Who is calling**: [`resolver`] turns a local admin token, an OIDC
//!    bearer token or an OIDC cookie into a [`Principal`]; [`middleware`]
//!    gates API routes behind it.
//! 2. **Logging in**: [`server`] runs the OIDC authorization-code flow as a
//!    relying party, plus a local admin login backed by a bcrypt hash stored
//!    in the cluster ([`secrets`]) and tokens from [`token`].
//! 3. **Git provider OAuth**: [`gitprovider`] builds PKCE ([`pkce`])
//!    authorize and token URLs for GitHub and GitLab.
//!
//! # Typical wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::Router;
//! use gitops_auth::config::AuthConfig;
//! use gitops_auth::secrets::StaticAdminPasswordStore;
//! use gitops_auth::{middleware, server};
//!
//! # async fn run(api: Router) -> Result<(), Box<dyn std::error::Error>> {
//! let auth = Arc::new(
//!     server::AuthServer::from_config(
//!         AuthConfig::default(),
//!         reqwest::Client::new(),
//!         Arc::new(StaticAdminPasswordStore::empty()),
//!     )
//!     .await?,
//! );
//!
//! let app = server::routes(auth.clone())?
//!     .merge(middleware::with_api_auth(api, &auth, vec!["/v1/featureflags".into()]));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gitprovider;
pub mod middleware;
pub mod oidc;
pub mod pkce;
pub mod principal;
pub mod resolver;
pub mod secrets;
pub mod server;
pub mod state;
pub mod token;

#[cfg(test)]
mod testing;

pub use error::AuthError;
pub use principal::Principal;
