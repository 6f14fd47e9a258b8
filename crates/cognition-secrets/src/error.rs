use cognition_core::error::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("access denied to secret {secret}: {message}")]
    AccessDenied { secret: String, message: String },

    #[error("failed to assume role {role_arn}: {message}")]
    AssumeRole { role_arn: String, message: String },

    #[error("malformed secret {secret}: {message}")]
    MalformedSecret { secret: String, message: String },

    #[error("secret {0} is missing username, password or host")]
    Incomplete(String),

    #[error("could not determine secret ARN through cognito claims or IAM overrides")]
    CallerUnresolved,

    #[error("Secrets Manager error: {0}")]
    SecretsManager(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl CredentialError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretNotFound(_))
    }
}

/// Walk the full error chain and join all causes into one string.
///
/// AWS SDK errors often have terse `Display` impls (e.g. "service error")
/// but useful detail in the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
