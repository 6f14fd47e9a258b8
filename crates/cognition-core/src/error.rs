use thiserror::Error;

/// Configuration validation failure. Raised before any network or database call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("option '{0}' missing in config")]
    Missing(&'static str),

    #[error("invalid value for option '{option}': {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}

/// A stored value that does not map onto a domain type.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown tenant role '{0}'")]
    UnknownTenantRole(String),
}
