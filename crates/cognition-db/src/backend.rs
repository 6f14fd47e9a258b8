use aws_config::SdkConfig;
use cognition_core::config::ConnectionMode;
use cognition_core::models::credentials::Credentials;
use cognition_core::models::row::{Row, Statement};
use cognition_secrets::{AssumedSession, BoxFuture};

use crate::error::DbError;
use crate::instance::InstanceBackend;
use crate::serverless::ServerlessBackend;

/// Per-statement execution settings understood by every backend.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// `SET LOCAL search_path` for the statement.
    pub schema: Option<String>,
    /// `SET LOCAL ROLE` for the statement (privilege de-escalation).
    pub pg_role: Option<String>,
    /// The SQL is a multi-statement script without parameters; it runs as
    /// one transaction and returns no rows.
    pub script: bool,
}

impl ExecOptions {
    /// Whether the statement needs an explicit transaction around it.
    pub fn needs_transaction(&self) -> bool {
        self.schema.is_some() || self.pg_role.is_some() || self.script
    }
}

/// One connectivity mode. Each instance owns one connection or one Data API client.
///
/// Methods return boxed futures for dyn compatibility.
pub trait QueryBackend: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    /// Execute one statement and return its rows (empty for statements
    /// without a result set).
    fn execute<'a>(
        &'a self,
        statement: &'a Statement,
        options: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>>;

    /// Release the connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DbError>>;
}

/// What a backend needs to connect.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub credentials: Credentials,
    /// Assumed-role session to make AWS calls under, if any.
    pub session: Option<AssumedSession>,
    pub database: String,
    /// Cluster ARN, serverless mode only.
    pub database_arn: Option<String>,
    /// Host used when the secret carries none.
    pub fallback_host: Option<String>,
}

/// Opens backends.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        mode: ConnectionMode,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn QueryBackend>, DbError>>;
}

/// Production connector: `tokio-postgres` for instance mode, the RDS Data API
/// for serverless mode.
#[derive(Clone)]
pub struct AwsConnector {
    sdk_config: SdkConfig,
}

impl AwsConnector {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

impl Connector for AwsConnector {
    fn connect<'a>(
        &'a self,
        mode: ConnectionMode,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn QueryBackend>, DbError>> {
        Box::pin(async move {
            let backend: Box<dyn QueryBackend> = match mode {
                ConnectionMode::Instance => Box::new(InstanceBackend::connect(target).await?),
                ConnectionMode::Serverless => {
                    Box::new(ServerlessBackend::new(&self.sdk_config, target)?)
                }
            };
            Ok(backend)
        })
    }
}
