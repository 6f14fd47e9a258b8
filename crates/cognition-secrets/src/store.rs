use std::future::Future;
use std::pin::Pin;

use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::error::ProvideErrorMetadata;
use tracing::{debug, info};

use crate::error::{CredentialError, format_err_chain};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read/write access to the secret store.
///
/// Methods return boxed futures for dyn compatibility.
pub trait SecretStore: Send + Sync {
    /// Fetch the `SecretString` of a secret by name or ARN.
    fn get_secret_string<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<String, CredentialError>>;

    /// Create a secret. Returns its ARN.
    fn create_secret<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>>;

    /// Delete a secret. `SecretNotFound` when it does not exist.
    fn delete_secret<'a>(
        &'a self,
        id: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<(), CredentialError>>;

    /// Whether a secret (including one pending deletion) exists under `id`.
    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>>;
}

/// `SecretStore` backed by AWS Secrets Manager.
#[derive(Clone)]
pub struct AwsSecretStore {
    client: Client,
}

impl AwsSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(Client::new(config))
    }
}

fn is_access_denied(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("AccessDeniedException") | Some("AccessDenied") | Some("UnauthorizedOperation")
    )
}

impl SecretStore for AwsSecretStore {
    fn get_secret_string<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            debug!(secret = %id, "fetching secret");
            let resp = self
                .client
                .get_secret_value()
                .secret_id(id)
                .send()
                .await
                .map_err(|e| {
                    let err = e.into_service_error();
                    if err.is_resource_not_found_exception() {
                        CredentialError::SecretNotFound(id.to_string())
                    } else if is_access_denied(err.code()) {
                        CredentialError::AccessDenied {
                            secret: id.to_string(),
                            message: err.message().unwrap_or_default().to_string(),
                        }
                    } else {
                        CredentialError::SecretsManager(format_err_chain(&err))
                    }
                })?;

            resp.secret_string()
                .map(str::to_string)
                .ok_or_else(|| CredentialError::MalformedSecret {
                    secret: id.to_string(),
                    message: "secret has no SecretString".to_string(),
                })
        })
    }

    fn create_secret<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            let resp = self
                .client
                .create_secret()
                .name(name)
                .description(description)
                .secret_string(value)
                .send()
                .await
                .map_err(|e| {
                    let err = e.into_service_error();
                    if is_access_denied(err.code()) {
                        CredentialError::AccessDenied {
                            secret: name.to_string(),
                            message: err.message().unwrap_or_default().to_string(),
                        }
                    } else {
                        CredentialError::SecretsManager(format_err_chain(&err))
                    }
                })?;

            let arn = resp.arn().unwrap_or(name).to_string();
            info!(secret = %name, arn = %arn, "secret created");
            Ok(arn)
        })
    }

    fn delete_secret<'a>(
        &'a self,
        id: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<(), CredentialError>> {
        Box::pin(async move {
            self.client
                .delete_secret()
                .secret_id(id)
                .force_delete_without_recovery(force)
                .send()
                .await
                .map_err(|e| {
                    let err = e.into_service_error();
                    if err.is_resource_not_found_exception() {
                        CredentialError::SecretNotFound(id.to_string())
                    } else if is_access_denied(err.code()) {
                        CredentialError::AccessDenied {
                            secret: id.to_string(),
                            message: err.message().unwrap_or_default().to_string(),
                        }
                    } else {
                        CredentialError::SecretsManager(format_err_chain(&err))
                    }
                })?;

            info!(secret = %id, force, "secret deleted");
            Ok(())
        })
    }

    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>> {
        Box::pin(async move {
            match self.client.describe_secret().secret_id(id).send().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let err = e.into_service_error();
                    if err.is_resource_not_found_exception() {
                        Ok(false)
                    } else {
                        Err(CredentialError::SecretsManager(format_err_chain(&err)))
                    }
                }
            }
        })
    }
}
