use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Secrets Manager prefix under which per-user database secrets live.
pub const DEFAULT_SECRETS_PATH: &str = "rds-db-credentials";

/// PostgreSQL port used when neither the config nor the secret names one.
pub const DEFAULT_PORT: u16 = 5432;

/// How statements reach the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Direct PostgreSQL connection to an RDS instance or cluster endpoint.
    Instance,
    /// Stateless execution through the RDS Data API.
    #[default]
    Serverless,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Serverless => "serverless",
        }
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" => Ok(Self::Instance),
            "serverless" | "data_api" | "data-api" => Ok(Self::Serverless),
            other => Err(ConfigError::Invalid {
                option: "mode",
                reason: format!("unknown connection mode '{other}'"),
            }),
        }
    }
}

/// Options for a `DatabaseClient`.
///
/// Every option may be omitted when the upper-cased option name is present in
/// the environment (`DATABASE`, `DATABASEARN`, `SECRETSPATH`, ...); see
/// [`ClientConfig::with_env_fallback`]. Environment values are parsed as JSON
/// when they parse, otherwise taken verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Database name. Required.
    #[serde(default)]
    pub database: String,
    /// Cluster ARN. Required in serverless mode.
    #[serde(default)]
    pub database_arn: Option<String>,
    /// Endpoint written into created secrets and used by instance mode when the
    /// secret carries no host.
    #[serde(default)]
    pub database_host: Option<String>,
    #[serde(default = "default_port")]
    pub database_port: u16,
    /// Secret used for all queries. When absent, the caller's secret is derived
    /// from the AppSync identity.
    #[serde(default)]
    pub database_secret_arn: Option<String>,
    #[serde(default = "default_secrets_path")]
    pub secrets_path: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    /// Role name -> IAM user ARN. A matching caller uses `{secretsPath}/{role}`.
    #[serde(default)]
    pub role_overrides: BTreeMap<String, String>,
    /// Role name -> secret ARN for callers holding an assumed-role session.
    #[serde(default)]
    pub assumed_role_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: ConnectionMode,
    /// Upper bound on each credential fetch and each query.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_secrets_path() -> String {
    DEFAULT_SECRETS_PATH.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            database_arn: None,
            database_host: None,
            database_port: DEFAULT_PORT,
            database_secret_arn: None,
            secrets_path: default_secrets_path(),
            region: None,
            account: None,
            role_overrides: BTreeMap::new(),
            assumed_role_overrides: BTreeMap::new(),
            mode: ConnectionMode::default(),
            timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Build a config entirely from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_fallback()
    }

    /// Fill every unset option from the process environment.
    pub fn with_env_fallback(self) -> Self {
        self.with_fallback_from(|key| std::env::var(key).ok())
    }

    /// Fill every unset option from `lookup`, keyed by the upper-cased option name.
    pub fn with_fallback_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|raw| env_text(&raw));

        if self.database.is_empty()
            && let Some(v) = text("DATABASE")
        {
            self.database = v;
        }
        if self.database_arn.is_none() {
            self.database_arn = text("DATABASEARN");
        }
        if self.database_host.is_none() {
            self.database_host = text("DATABASEHOST");
        }
        if self.database_port == DEFAULT_PORT
            && let Some(port) = text("DATABASEPORT").and_then(|v| v.parse().ok())
        {
            self.database_port = port;
        }
        if self.database_secret_arn.is_none() {
            self.database_secret_arn = text("DATABASESECRETARN");
        }
        if self.secrets_path == DEFAULT_SECRETS_PATH
            && let Some(v) = text("SECRETSPATH")
        {
            self.secrets_path = v;
        }
        if self.region.is_none() {
            self.region = text("REGION").or_else(|| text("AWS_REGION"));
        }
        if self.account.is_none() {
            self.account = text("ACCOUNT");
        }
        if self.role_overrides.is_empty()
            && let Some(map) = lookup("ROLEOVERRIDES").and_then(|v| serde_json::from_str(&v).ok())
        {
            self.role_overrides = map;
        }
        if self.assumed_role_overrides.is_empty()
            && let Some(map) =
                lookup("ASSUMEDROLEOVERRIDES").and_then(|v| serde_json::from_str(&v).ok())
        {
            self.assumed_role_overrides = map;
        }
        if self.mode == ConnectionMode::default()
            && let Some(mode) = text("MODE").and_then(|v| v.parse().ok())
        {
            self.mode = mode;
        }
        if self.timeout_secs.is_none() {
            self.timeout_secs = text("TIMEOUTSECS").and_then(|v| v.parse().ok());
        }

        self.normalized()
    }

    /// Strip trailing separators from `secrets_path`.
    pub fn normalized(mut self) -> Self {
        let trimmed = self.secrets_path.trim_end_matches('/');
        if trimmed.len() != self.secrets_path.len() {
            self.secrets_path = trimmed.to_string();
        }
        self
    }

    /// Check that every option required by the configured mode is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::Missing("database"));
        }
        if self.secrets_path.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid {
                option: "secretsPath",
                reason: "must not be empty".to_string(),
            });
        }
        match self.mode {
            ConnectionMode::Serverless => {
                self.require_database_arn()?;
            }
            ConnectionMode::Instance => {}
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                option: "timeoutSecs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn require_database_arn(&self) -> Result<&str, ConfigError> {
        non_empty(self.database_arn.as_deref()).ok_or(ConfigError::Missing("databaseArn"))
    }

    pub fn require_database_host(&self) -> Result<&str, ConfigError> {
        non_empty(self.database_host.as_deref()).ok_or(ConfigError::Missing("databaseHost"))
    }

    /// `arn:aws:secretsmanager:{region}:{account}:{secretsPath}`
    pub fn secret_base(&self) -> Result<String, ConfigError> {
        let region = non_empty(self.region.as_deref()).ok_or(ConfigError::Missing("region"))?;
        let account = non_empty(self.account.as_deref()).ok_or(ConfigError::Missing("account"))?;
        Ok(format!(
            "arn:aws:secretsmanager:{region}:{account}:{}",
            self.secrets_path.trim_end_matches('/')
        ))
    }

    /// Secret name holding the database login of the user with `email`.
    pub fn user_secret_name(&self, email: &str) -> String {
        format!("{}/{email}", self.secrets_path.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Environment values may be JSON-encoded (`"\"mydb\""`) or plain (`mydb`).
fn env_text(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Number(n)) => n.to_string(),
        _ => raw.to_string(),
    }
}
