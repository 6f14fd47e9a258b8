use cognition_cognito::TriggerError;
use cognition_core::error::ConfigError;
use cognition_db::DbError;
use thiserror::Error;

/// Errors returned to the Lambda runtime. Cognito shows the message to the
/// user when a trigger fails.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("malformed event: {0}")]
    Event(#[from] serde_json::Error),
}
