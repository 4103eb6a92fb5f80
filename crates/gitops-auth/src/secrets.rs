//! Admin password hash lookup.
//!
//! The local admin login compares the supplied password against a bcrypt
//! hash stored under `data.password` of a Kubernetes `Secret`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::config::AdminSecretRef;

/// Key of the bcrypt hash inside the secret's data.
pub const PASSWORD_KEY: &str = "password";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} has no `password` entry")]
    MissingKey { namespace: String, name: String },

    #[error("failed to read secret: {0}")]
    Kube(#[from] kube::Error),
}

impl SecretError {
    /// Whether the failure means no admin password has been configured, as
    /// opposed to the secret being unreadable.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MissingKey { .. })
    }
}

/// Source of the bcrypt admin password hash.
#[async_trait]
pub trait AdminPasswordStore: Send + Sync {
    async fn password_hash(&self) -> Result<Vec<u8>, SecretError>;
}

/// Reads the hash from a cluster `Secret`.
pub struct KubeAdminPasswordStore {
    secrets: Api<Secret>,
    secret: AdminSecretRef,
}

impl KubeAdminPasswordStore {
    pub fn new(client: Client, secret: AdminSecretRef) -> Self {
        Self {
            secrets: Api::namespaced(client, &secret.namespace),
            secret,
        }
    }
}

#[async_trait]
impl AdminPasswordStore for KubeAdminPasswordStore {
    async fn password_hash(&self) -> Result<Vec<u8>, SecretError> {
        let secret = self
            .secrets
            .get_opt(&self.secret.name)
            .await?
            .ok_or_else(|| SecretError::NotFound {
                namespace: self.secret.namespace.clone(),
                name: self.secret.name.clone(),
            })?;

        secret
            .data
            .and_then(|mut data| data.remove(PASSWORD_KEY))
            .map(|bytes| bytes.0)
            .ok_or_else(|| SecretError::MissingKey {
                namespace: self.secret.namespace.clone(),
                name: self.secret.name.clone(),
            })
    }
}

/// Fixed hash held in memory, for tests and clusterless development.
#[derive(Debug, Clone, Default)]
pub struct StaticAdminPasswordStore {
    hash: Option<Vec<u8>>,
}

impl StaticAdminPasswordStore {
    pub fn new(hash: impl Into<Vec<u8>>) -> Self {
        Self {
            hash: Some(hash.into()),
        }
    }

    /// A store in which no password has been set.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminPasswordStore for StaticAdminPasswordStore {
    async fn password_hash(&self) -> Result<Vec<u8>, SecretError> {
        self.hash.clone().ok_or_else(|| {
            let secret = AdminSecretRef::default();
            SecretError::NotFound {
                namespace: secret.namespace,
                name: secret.name,
            }
        })
    }
}
