use cognition_core::error::{ConfigError, ModelError};
use cognition_secrets::CredentialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("role already exists: {0}")]
    RoleConflict(String),

    #[error("schema clone failed: {0}")]
    SchemaClone(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("client is closed")]
    ClosedClient,

    #[error("query failed: {message}")]
    QueryExecution {
        message: String,
        /// SQLSTATE when the server reported one.
        code: Option<String>,
    },

    #[error("application user {0} does not exist")]
    UserNotFound(String),

    #[error("tenant {0} does not exist")]
    TenantNotFound(String),

    #[error("invalid invitation for {email}: {reason}")]
    Invitation { email: String, reason: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unexpected value in database: {0}")]
    Model(#[from] ModelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
            code: None,
        }
    }

    /// SQLSTATE of a failed query.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::QueryExecution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// `duplicate_object` (role exists) or `duplicate_schema`.
    pub fn is_duplicate(&self) -> bool {
        matches!(self.sql_state(), Some("42710") | Some("42P06"))
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        let code = e.code().map(|c| c.code().to_string());
        let message = match e.as_db_error() {
            Some(db) => db.message().to_string(),
            None => cognition_secrets::error::format_err_chain(&e),
        };
        Self::QueryExecution { message, code }
    }
}
