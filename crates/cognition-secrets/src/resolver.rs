use std::sync::Arc;

use aws_config::SdkConfig;
use cognition_core::models::credentials::{Credentials, RoleOverride, SecretBundle, SecretRef};
use tracing::debug;

use crate::error::CredentialError;
use crate::store::{AwsSecretStore, SecretStore};
use crate::sts::{AssumedSession, AwsRoleAssumer, RoleAssumer};

/// Credentials plus the assumed-role session they were read under, if any.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub credentials: Credentials,
    pub session: Option<AssumedSession>,
}

/// Turns a secret reference into a database login.
///
/// No retries: callers wrap calls in their own resilience policy.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    assumer: Arc<dyn RoleAssumer>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn SecretStore>, assumer: Arc<dyn RoleAssumer>) -> Self {
        Self { store, assumer }
    }

    /// Resolver using Secrets Manager and STS with the ambient AWS identity.
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(
            Arc::new(AwsSecretStore::from_sdk_config(config)),
            Arc::new(AwsRoleAssumer::from_sdk_config(config)),
        )
    }

    /// Store acting under the ambient identity.
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    pub async fn get_credentials(
        &self,
        secret: &SecretRef,
        role: Option<&RoleOverride>,
    ) -> Result<Credentials, CredentialError> {
        Ok(self.resolve(secret, role).await?.credentials)
    }

    /// Fetch `secret`, first assuming `role` when given.
    pub async fn resolve(
        &self,
        secret: &SecretRef,
        role: Option<&RoleOverride>,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let (raw, session) = match role {
            Some(role) => {
                let scoped = self.assumer.assume_role(role).await?;
                let raw = scoped.store.get_secret_string(secret.as_str()).await?;
                (raw, Some(scoped.session))
            }
            None => (self.store.get_secret_string(secret.as_str()).await?, None),
        };

        let bundle = parse_bundle(secret, &raw)?;
        let expires_at = session.as_ref().and_then(|s| s.expires_at);
        let credentials = Credentials::from_bundle(secret.clone(), bundle, expires_at);
        if !credentials.is_complete() {
            return Err(CredentialError::Incomplete(secret.to_string()));
        }

        debug!(
            secret = %secret,
            username = %credentials.username,
            assumed = session.is_some(),
            "credentials resolved"
        );

        Ok(ResolvedCredentials {
            credentials,
            session,
        })
    }
}

/// Parse a secret string into a [`SecretBundle`].
pub fn parse_bundle(secret: &SecretRef, raw: &str) -> Result<SecretBundle, CredentialError> {
    serde_json::from_str(raw).map_err(|e| CredentialError::MalformedSecret {
        secret: secret.to_string(),
        message: e.to_string(),
    })
}
