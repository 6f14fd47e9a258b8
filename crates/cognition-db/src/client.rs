use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use cognition_core::config::{ClientConfig, ConnectionMode};
use cognition_core::error::ConfigError;
use cognition_core::events::AppSyncIdentity;
use cognition_core::models::credentials::{Credentials, RoleOverride, SecretRef};
use cognition_core::models::row::{Row, SqlValue, Statement};
use cognition_secrets::caller::resolve_caller_secret;
use cognition_secrets::client::build_sdk_config;
use cognition_secrets::{CredentialError, CredentialResolver, ResolvedCredentials};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{AwsConnector, ConnectTarget, Connector, ExecOptions, QueryBackend};
use crate::error::DbError;

/// Per-call options for [`DatabaseClient::run_query`] and friends.
///
/// Overrides (`secret`, `role_override`, `database`) apply to this call only:
/// the statement runs on a dedicated connection that is closed afterwards.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Values for the `:name` placeholders of the statement.
    pub parameters: Vec<(String, SqlValue)>,
    /// `search_path` for the statement.
    pub schema: Option<String>,
    pub database: Option<String>,
    pub secret: Option<SecretRef>,
    /// Database role to `SET LOCAL ROLE` to before the statement runs.
    pub pg_role: Option<String>,
    /// IAM role assumed before the secret is read.
    pub role_override: Option<RoleOverride>,
    /// Run the SQL as a parameterless multi-statement script.
    pub script: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        self.parameters
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn as_role(mut self, role: impl Into<String>) -> Self {
        self.pg_role = Some(role.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<SecretRef>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn assume(mut self, role: RoleOverride) -> Self {
        self.role_override = Some(role);
        self
    }

    pub fn script(mut self) -> Self {
        self.script = true;
        self
    }

    fn is_one_off(&self) -> bool {
        self.secret.is_some() || self.role_override.is_some() || self.database.is_some()
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            schema: self.schema.clone(),
            pg_role: self.pg_role.clone(),
            script: self.script,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Unopened,
    Open,
    Closed,
}

struct OpenState {
    resolved: ResolvedCredentials,
    backends: HashMap<ConnectionMode, Box<dyn QueryBackend>>,
}

enum ClientState {
    Unopened,
    Open(OpenState),
    Closed,
}

/// Tenant database client.
///
/// Credentials resolve on the first operation. At most one backend per
/// connection mode is kept open; operations are serialized. `close` is
/// terminal: every later call fails with [`DbError::ClosedClient`].
pub struct DatabaseClient {
    config: ClientConfig,
    secret: SecretRef,
    resolver: CredentialResolver,
    connector: Arc<dyn Connector>,
    state: Mutex<ClientState>,
}

impl DatabaseClient {
    /// Client querying with `config.database_secret_arn`.
    pub fn new(
        config: ClientConfig,
        resolver: CredentialResolver,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, DbError> {
        let config = config.normalized();
        config.validate()?;
        let secret = configured_secret(&config).ok_or(ConfigError::Missing("databaseSecretArn"))?;
        Ok(Self::with_secret(config, secret, resolver, connector))
    }

    /// Client querying as the caller behind an AppSync identity, unless the
    /// config pins a secret.
    pub fn for_caller(
        config: ClientConfig,
        identity: Option<&AppSyncIdentity>,
        resolver: CredentialResolver,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, DbError> {
        let config = config.normalized();
        config.validate()?;
        let secret = match configured_secret(&config) {
            Some(secret) => secret,
            None => {
                let identity = identity.ok_or(CredentialError::CallerUnresolved)?;
                resolve_caller_secret(&config, identity)?
            }
        };
        Ok(Self::with_secret(config, secret, resolver, connector))
    }

    /// Client configured from the environment, talking to AWS.
    pub async fn from_env(identity: Option<&AppSyncIdentity>) -> Result<Self, DbError> {
        let config = ClientConfig::from_env();
        config.validate()?;
        let sdk_config = build_sdk_config(config.region.as_deref()).await;
        let resolver = CredentialResolver::from_sdk_config(&sdk_config);
        let connector = Arc::new(AwsConnector::new(sdk_config));
        Self::for_caller(config, identity, resolver, connector)
    }

    fn with_secret(
        config: ClientConfig,
        secret: SecretRef,
        resolver: CredentialResolver,
        connector: Arc<dyn Connector>,
    ) -> Self {
        debug!(
            secret = %secret,
            mode = config.mode.as_str(),
            database = %config.database,
            "database client created"
        );
        Self {
            config,
            secret,
            resolver,
            connector,
            state: Mutex::new(ClientState::Unopened),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Secret the client queries with.
    pub fn secret(&self) -> &SecretRef {
        &self.secret
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub async fn status(&self) -> ClientStatus {
        match &*self.state.lock().await {
            ClientState::Unopened => ClientStatus::Unopened,
            ClientState::Open(_) => ClientStatus::Open,
            ClientState::Closed => ClientStatus::Closed,
        }
    }

    /// Fail with `ClosedClient` once the client has been closed.
    pub async fn ensure_usable(&self) -> Result<(), DbError> {
        match &*self.state.lock().await {
            ClientState::Closed => Err(DbError::ClosedClient),
            _ => Ok(()),
        }
    }

    /// The credentials the client queries with, resolving them if needed.
    pub async fn get_credentials(&self) -> Result<Credentials, DbError> {
        let mut state = self.state.lock().await;
        let open = self.ensure_open(&mut *state).await?;
        Ok(open.resolved.credentials.clone())
    }

    /// Run one statement in the configured mode.
    pub async fn run_query(&self, sql: &str, options: QueryOptions) -> Result<Vec<Row>, DbError> {
        self.run_in(self.config.mode, sql, options).await
    }

    /// Run one statement over a direct PostgreSQL connection.
    pub async fn run_instance_query(
        &self,
        sql: &str,
        options: QueryOptions,
    ) -> Result<Vec<Row>, DbError> {
        self.run_in(ConnectionMode::Instance, sql, options).await
    }

    /// Run one statement through the RDS Data API.
    pub async fn run_serverless_query(
        &self,
        sql: &str,
        options: QueryOptions,
    ) -> Result<Vec<Row>, DbError> {
        self.run_in(ConnectionMode::Serverless, sql, options).await
    }

    /// Release every backend and drop the credentials.
    pub async fn close(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ClientState::Closed) {
            ClientState::Closed => Err(DbError::ClosedClient),
            ClientState::Unopened => {
                debug!("database client closed before first use");
                Ok(())
            }
            ClientState::Open(open) => {
                close_backends(open.backends).await;
                info!(secret = %self.secret, "database client closed");
                Ok(())
            }
        }
    }

    pub(crate) async fn run_in(
        &self,
        mode: ConnectionMode,
        sql: &str,
        options: QueryOptions,
    ) -> Result<Vec<Row>, DbError> {
        let exec = options.exec_options();
        let statement = Statement {
            sql: sql.to_string(),
            params: options.parameters.clone(),
        };

        let mut state = self.state.lock().await;
        if options.is_one_off() {
            if matches!(*state, ClientState::Closed) {
                return Err(DbError::ClosedClient);
            }
            return self.run_one_off(mode, &statement, &exec, &options).await;
        }

        let open = self.ensure_open(&mut *state).await?;
        let backend = match open.backends.entry(mode) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let target = self.target(&open.resolved, None);
                let backend = self
                    .with_timeout("connect", self.connector.connect(mode, &target))
                    .await?;
                info!(mode = mode.as_str(), database = %target.database, "backend opened");
                entry.insert(backend)
            }
        };

        debug!(
            mode = mode.as_str(),
            params = statement.params.len(),
            pg_role = exec.pg_role.as_deref(),
            "running query"
        );
        self.with_timeout("query", backend.execute(&statement, &exec))
            .await
    }

    async fn run_one_off(
        &self,
        mode: ConnectionMode,
        statement: &Statement,
        exec: &ExecOptions,
        options: &QueryOptions,
    ) -> Result<Vec<Row>, DbError> {
        let secret = options.secret.as_ref().unwrap_or(&self.secret);
        let resolved = self
            .with_timeout("credential fetch", async {
                Ok(self
                    .resolver
                    .resolve(secret, options.role_override.as_ref())
                    .await?)
            })
            .await?;

        let target = self.target(&resolved, options.database.as_deref());
        let backend = self
            .with_timeout("connect", self.connector.connect(mode, &target))
            .await?;

        debug!(
            mode = mode.as_str(),
            secret = %secret,
            assumed = resolved.session.is_some(),
            "running one-off query"
        );
        let result = self
            .with_timeout("query", backend.execute(statement, exec))
            .await;
        if let Err(e) = backend.close().await {
            warn!(error = %e, "failed to close one-off backend");
        }
        result
    }

    /// Move to `Open`, resolving credentials on first use. The client-wide
    /// login is read under the process identity and carries no expiry;
    /// assumed-role credentials only live for one call in `run_one_off`.
    async fn ensure_open<'s>(
        &self,
        state: &'s mut ClientState,
    ) -> Result<&'s mut OpenState, DbError> {
        if let ClientState::Unopened = state {
            let resolved = self
                .with_timeout("credential fetch", async {
                    Ok(self.resolver.resolve(&self.secret, None).await?)
                })
                .await?;
            *state = ClientState::Open(OpenState {
                resolved,
                backends: HashMap::new(),
            });
        }

        match state {
            ClientState::Open(open) => Ok(open),
            _ => Err(DbError::ClosedClient),
        }
    }

    fn target(&self, resolved: &ResolvedCredentials, database: Option<&str>) -> ConnectTarget {
        ConnectTarget {
            credentials: resolved.credentials.clone(),
            session: resolved.session.clone(),
            database: database.unwrap_or(&self.config.database).to_string(),
            database_arn: self.config.database_arn.clone(),
            fallback_host: self.config.database_host.clone(),
        }
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                DbError::Timeout(format!("{what} exceeded {}s", limit.as_secs()))
            })?,
            None => fut.await,
        }
    }
}

fn configured_secret(config: &ClientConfig) -> Option<SecretRef> {
    config
        .database_secret_arn
        .as_deref()
        .filter(|arn| !arn.trim().is_empty())
        .map(SecretRef::from)
}

async fn close_backends(backends: HashMap<ConnectionMode, Box<dyn QueryBackend>>) {
    for (mode, backend) in backends {
        if let Err(e) = backend.close().await {
            warn!(mode = mode.as_str(), error = %e, "failed to close backend");
        }
    }
}
