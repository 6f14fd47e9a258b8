use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PORT;

/// Name or ARN of a Secrets Manager secret holding a database login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SecretRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// IAM role assumed through STS for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOverride {
    pub role_arn: String,
    pub session_name: Option<String>,
}

impl RoleOverride {
    pub const DEFAULT_SESSION_NAME: &'static str = "pg-cognition";

    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            session_name: None,
        }
    }

    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    pub fn session_name(&self) -> &str {
        self.session_name
            .as_deref()
            .unwrap_or(Self::DEFAULT_SESSION_NAME)
    }
}

/// JSON document stored in a database secret.
///
/// Matches the layout RDS itself uses for managed secrets, so secrets created
/// by the console and by `create_database_user` are interchangeable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_cluster_identifier: Option<String>,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
}

fn default_engine() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("db_cluster_identifier", &self.db_cluster_identifier)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("username", &self.username)
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// A resolved database login.
///
/// `expires_at` is set when the secret was read under an assumed-role
/// session; the credentials are unusable once it passes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub secret: SecretRef,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: Option<String>,
    pub expires_at: Option<jiff::Timestamp>,
}

impl Credentials {
    pub fn from_bundle(
        secret: SecretRef,
        bundle: SecretBundle,
        expires_at: Option<jiff::Timestamp>,
    ) -> Self {
        Self {
            secret,
            username: bundle.username,
            password: bundle.password,
            host: bundle.host,
            port: bundle.port,
            dbname: bundle.dbname,
            expires_at,
        }
    }

    /// Username, password and host are all present.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty() && !self.host.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(jiff::Timestamp::now())
    }

    pub fn is_expired_at(&self, now: jiff::Timestamp) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret", &self.secret)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
