use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use aws_config::SdkConfig;
use aws_sdk_sts::Client;
use cognition_core::models::credentials::RoleOverride;
use tracing::info;

use crate::error::{CredentialError, format_err_chain};
use crate::store::{AwsSecretStore, BoxFuture, SecretStore};

/// Temporary AWS credentials returned by `sts:AssumeRole`.
#[derive(Clone)]
pub struct AssumedSession {
    pub role_arn: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: Option<jiff::Timestamp>,
}

impl AssumedSession {
    /// Credentials provider for building SDK clients under this session.
    pub fn provider(&self) -> aws_sdk_sts::config::Credentials {
        aws_sdk_sts::config::Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
            self.expires_at.map(SystemTime::from),
            "pg-cognition-assume-role",
        )
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|t| t <= jiff::Timestamp::now())
    }
}

impl fmt::Debug for AssumedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumedSession")
            .field("role_arn", &self.role_arn)
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// An assumed session together with a secret store acting under it.
pub struct ScopedSecrets {
    pub session: AssumedSession,
    pub store: Arc<dyn SecretStore>,
}

/// Security-token exchange.
pub trait RoleAssumer: Send + Sync {
    fn assume_role<'a>(
        &'a self,
        role: &'a RoleOverride,
    ) -> BoxFuture<'a, Result<ScopedSecrets, CredentialError>>;
}

/// `RoleAssumer` backed by AWS STS.
#[derive(Clone)]
pub struct AwsRoleAssumer {
    client: Client,
    sdk_config: SdkConfig,
}

impl AwsRoleAssumer {
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            sdk_config: config.clone(),
        }
    }
}

impl RoleAssumer for AwsRoleAssumer {
    fn assume_role<'a>(
        &'a self,
        role: &'a RoleOverride,
    ) -> BoxFuture<'a, Result<ScopedSecrets, CredentialError>> {
        Box::pin(async move {
            let assume_failed = |message: String| CredentialError::AssumeRole {
                role_arn: role.role_arn.clone(),
                message,
            };

            let resp = self
                .client
                .assume_role()
                .role_arn(&role.role_arn)
                .role_session_name(role.session_name())
                .send()
                .await
                .map_err(|e| assume_failed(format_err_chain(&e.into_service_error())))?;

            let creds = resp
                .credentials()
                .ok_or_else(|| assume_failed("response carried no credentials".to_string()))?;

            let session = AssumedSession {
                role_arn: role.role_arn.clone(),
                access_key_id: creds.access_key_id().to_string(),
                secret_access_key: creds.secret_access_key().to_string(),
                session_token: creds.session_token().to_string(),
                expires_at: jiff::Timestamp::from_second(creds.expiration().secs()).ok(),
            };

            info!(
                role_arn = %role.role_arn,
                session = %role.session_name(),
                "assumed role"
            );

            let conf = aws_sdk_secretsmanager::config::Builder::from(&self.sdk_config)
                .credentials_provider(session.provider())
                .build();
            let store = AwsSecretStore::new(aws_sdk_secretsmanager::Client::from_conf(conf));

            Ok(ScopedSecrets {
                session,
                store: Arc::new(store),
            })
        })
    }
}
