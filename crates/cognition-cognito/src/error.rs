use cognition_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger event carries no email attribute")]
    MissingEmail,

    #[error("no application user with email {0}")]
    UserNotFound(String),

    #[error("user {0} has not been invited")]
    NotInvited(String),

    #[error("user {0} is not active")]
    NotActive(String),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("unexpected user row: {0}")]
    Serialization(#[from] serde_json::Error),
}
