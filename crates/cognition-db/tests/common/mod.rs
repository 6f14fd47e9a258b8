#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cognition_core::config::{ClientConfig, ConnectionMode};
use cognition_core::models::credentials::RoleOverride;
use cognition_core::models::row::{Row, SqlValue, Statement};
use cognition_core::models::tenant::tenant_of_group;
use cognition_db::params::split_statements;
use cognition_db::{
    ConnectTarget, Connector, DatabaseClient, DbError, ExecOptions, QueryBackend,
};
use cognition_secrets::{
    AssumedSession, BoxFuture, CredentialError, CredentialResolver, RoleAssumer, ScopedSecrets,
    SecretStore,
};
use serde_json::{Value, json};

pub const APP_SECRET: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:app";
pub const APP_LOGIN: &str = r#"{"engine":"postgres","host":"db.internal","password":"pw","port":5432,"username":"app_owner"}"#;
pub const AUDITOR_SECRET: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:auditor";
pub const AUDITOR_LOGIN: &str = r#"{"engine":"postgres","host":"db.internal","password":"pw2","port":5432,"username":"auditor"}"#;
pub const AUDITOR_ROLE: &str = "arn:aws:iam::123456789012:role/auditor";

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub secrets: Mutex<HashMap<String, String>>,
    pub reads: AtomicUsize,
    /// Reject `create_secret`.
    pub read_only: AtomicBool,
}

impl MemoryStore {
    pub fn with(secrets: &[(&str, &str)]) -> Self {
        Self {
            secrets: Mutex::new(
                secrets
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            reads: AtomicUsize::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    fn key(id: &str) -> &str {
        id.strip_prefix("arn:test:").unwrap_or(id)
    }
}

impl SecretStore for MemoryStore {
    fn get_secret_string<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.get(Self::key(id))
                .ok_or_else(|| CredentialError::SecretNotFound(id.to_string()))
        })
    }

    fn create_secret<'a>(
        &'a self,
        name: &'a str,
        _description: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            if self.read_only.load(Ordering::SeqCst) {
                return Err(CredentialError::SecretsManager(format!(
                    "AccessDeniedException: {name}"
                )));
            }
            let mut secrets = self.secrets.lock().unwrap();
            if secrets.contains_key(name) {
                return Err(CredentialError::SecretsManager(format!(
                    "ResourceExistsException: {name}"
                )));
            }
            secrets.insert(name.to_string(), value.to_string());
            Ok(format!("arn:test:{name}"))
        })
    }

    fn delete_secret<'a>(
        &'a self,
        id: &'a str,
        _force: bool,
    ) -> BoxFuture<'a, Result<(), CredentialError>> {
        Box::pin(async move {
            self.secrets
                .lock()
                .unwrap()
                .remove(Self::key(id))
                .map(|_| ())
                .ok_or_else(|| CredentialError::SecretNotFound(id.to_string()))
        })
    }

    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>> {
        Box::pin(async move { Ok(self.get(Self::key(id)).is_some()) })
    }
}

/// Assumes any role, handing out the shared store.
pub struct FakeAssumer {
    pub store: Arc<MemoryStore>,
    pub calls: AtomicUsize,
}

impl RoleAssumer for FakeAssumer {
    fn assume_role<'a>(
        &'a self,
        role: &'a RoleOverride,
    ) -> BoxFuture<'a, Result<ScopedSecrets, CredentialError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScopedSecrets {
                session: AssumedSession {
                    role_arn: role.role_arn.clone(),
                    access_key_id: "ASIA".to_string(),
                    secret_access_key: "secret".to_string(),
                    session_token: "token".to_string(),
                    expires_at: None,
                },
                store: self.store.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeUser {
    pub id: String,
    pub email: String,
    pub status: String,
    pub group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Executed {
    pub mode: ConnectionMode,
    pub username: String,
    pub statement: Statement,
    pub options: ExecOptions,
}

/// In-memory stand-in for the parts of the PostgreSQL catalog the client
/// touches. Statements are recognised by their text.
#[derive(Debug, Default)]
pub struct Catalog {
    /// role -> groups it is a direct member of
    pub roles: BTreeMap<String, BTreeSet<String>>,
    /// schema -> tables
    pub schemas: BTreeMap<String, Vec<String>>,
    /// (id, name, displayname)
    pub tenants: Vec<(String, String, String)>,
    pub users: Vec<FakeUser>,
    pub executed: Vec<Executed>,
    /// Statements containing this text fail.
    pub fail_on: Option<String>,
}

impl Catalog {
    pub fn with_template(tables: &[&str]) -> Self {
        let mut catalog = Self::default();
        catalog.schemas.insert(
            "tenant_template".to_string(),
            tables.iter().map(|t| t.to_string()).collect(),
        );
        for global in ["tenant_admins", "tenant_users"] {
            catalog.roles.insert(global.to_string(), BTreeSet::new());
        }
        catalog
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed
            .iter()
            .map(|e| e.statement.sql.clone())
            .collect()
    }

    fn groups_of(&self, role: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = self
            .roles
            .get(role)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(group) = stack.pop() {
            if seen.insert(group.clone())
                && let Some(parents) = self.roles.get(&group)
            {
                stack.extend(parents.iter().cloned());
            }
        }
        seen.into_iter().collect()
    }

    fn apply(&mut self, sql: &str, params: &[(String, SqlValue)]) -> Result<Vec<Row>, DbError> {
        let sql = sql.trim();
        let param = |name: &str| -> String {
            params
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, v)| v.to_text())
                .unwrap_or_default()
        };

        if let Some(fail) = &self.fail_on
            && sql.contains(fail.as_str())
        {
            return Err(DbError::query(format!("injected failure on {fail}")));
        }

        if sql.contains("FROM pg_roles WHERE rolname") {
            let name = param("NAME");
            return Ok(if self.roles.contains_key(&name) {
                vec![row(json!({ "rolname": name }))]
            } else {
                Vec::new()
            });
        }

        if sql.starts_with("CREATE ROLE") {
            let idents = object_names(sql);
            let Some(name) = idents.first().cloned() else {
                return Ok(Vec::new());
            };
            if self.roles.contains_key(&name) {
                return Err(duplicate(format!("role \"{name}\" already exists"), "42710"));
            }
            let groups = idents.get(1).cloned().into_iter().collect();
            self.roles.insert(name, groups);
            return Ok(Vec::new());
        }

        if sql.starts_with("DROP ROLE") {
            if let Some(name) = object_names(sql).first() {
                self.roles.remove(name);
            }
            return Ok(Vec::new());
        }

        if sql.starts_with("DROP SCHEMA") {
            if let Some(name) = object_names(sql).first() {
                self.schemas.remove(name);
            }
            return Ok(Vec::new());
        }

        if sql.contains("FROM pg_namespace") {
            return Ok(["TEMPLATE", "TENANT"]
                .iter()
                .map(|p| param(p))
                .filter(|s| self.schemas.contains_key(s))
                .map(|s| row(json!({ "nspname": s })))
                .collect());
        }

        if sql.contains("FROM information_schema.tables") {
            let tables = self
                .schemas
                .get(&param("TEMPLATE"))
                .cloned()
                .unwrap_or_default();
            return Ok(tables
                .into_iter()
                .map(|t| row(json!({ "table_name": t })))
                .collect());
        }

        if sql.starts_with("CREATE SCHEMA") {
            let Some(name) = object_names(sql).first().cloned() else {
                return Ok(Vec::new());
            };
            if self.schemas.contains_key(&name) {
                if sql.contains("IF NOT EXISTS") {
                    return Ok(Vec::new());
                }
                return Err(duplicate(format!("schema \"{name}\" already exists"), "42P06"));
            }
            self.schemas.insert(name, Vec::new());
            return Ok(Vec::new());
        }

        if sql.starts_with("CREATE TABLE") {
            let idents = object_names(sql);
            if let [schema, table, ..] = idents.as_slice()
                && let Some(tables) = self.schemas.get_mut(schema)
            {
                tables.push(table.clone());
            }
            return Ok(Vec::new());
        }

        if sql.contains("cognition.createrole(") {
            let literals = quoted_literals(sql);
            let groups = literals.get(1).cloned().into_iter().collect();
            self.roles.entry(literals[0].clone()).or_insert(groups);
            return Ok(Vec::new());
        }

        if sql.starts_with("GRANT") {
            return Ok(Vec::new());
        }

        if sql.starts_with("INSERT INTO cognition.tenants") {
            let literals = quoted_literals(sql);
            if self.tenants.iter().any(|(_, name, _)| *name == literals[0]) {
                return Err(duplicate("duplicate tenant".to_string(), "23505"));
            }
            let id = format!("00000000-0000-0000-0000-{:012}", self.tenants.len() + 1);
            self.tenants
                .push((id, literals[0].clone(), literals[1].clone()));
            return Ok(Vec::new());
        }

        if sql.contains("FROM cognition.tenants WHERE name = :NAME") {
            let name = param("NAME");
            return Ok(self
                .tenants
                .iter()
                .filter(|(_, n, _)| *n == name)
                .map(|(id, n, d)| row(json!({ "id": id, "name": n, "displayname": d })))
                .collect());
        }

        if sql.starts_with("SELECT name FROM cognition.tenants") {
            let mut names: Vec<String> = self.tenants.iter().map(|(_, n, _)| n.clone()).collect();
            names.sort();
            return Ok(names.into_iter().map(|n| row(json!({ "name": n }))).collect());
        }

        if sql.contains("cognition.gettenants(:USERNAME)") {
            let direct = self.roles.get(&param("USERNAME")).cloned().unwrap_or_default();
            let names: BTreeSet<String> = direct
                .iter()
                .map(|g| tenant_of_group(g).to_string())
                .filter(|t| self.tenants.iter().any(|(_, n, _)| n == t))
                .collect();
            return Ok(names.into_iter().map(|n| row(json!({ "name": n }))).collect());
        }

        if sql.contains("cognition.groupsof(:USERNAME)") {
            return Ok(self
                .groups_of(&param("USERNAME"))
                .into_iter()
                .map(|g| row(json!({ "name": g })))
                .collect());
        }

        if sql.contains("cognition.tenantrole(:EMAIL, :TENANT)") {
            let tenant = param("TENANT");
            let role = self
                .users
                .iter()
                .find(|u| u.email == param("EMAIL"))
                .and_then(|u| {
                    self.groups_of(&u.id)
                        .into_iter()
                        .find(|g| g.starts_with(&format!("{tenant}_")))
                })
                .and_then(|g| {
                    g.strip_suffix("s")
                        .and_then(|g| g.rsplit('_').next())
                        .map(str::to_string)
                });
            return Ok(vec![row(json!({ "role": role }))]);
        }

        if sql.starts_with("INSERT INTO cognition.users") {
            let email = param("EMAIL");
            if self.users.iter().any(|u| u.email == email) {
                return Err(duplicate("duplicate key value".to_string(), "23505"));
            }
            let invitation: Value = serde_json::from_str(&param("INVITATION")).unwrap_or_default();
            let user = FakeUser {
                id: param("ID"),
                email,
                status: "invited".to_string(),
                group: invitation["role"].as_str().map(str::to_string),
            };
            let out = row(json!({ "id": user.id, "email": user.email, "status": user.status }));
            self.users.push(user);
            return Ok(vec![out]);
        }

        if sql.starts_with("UPDATE cognition.users SET status = 'active'") {
            let email = param("EMAIL");
            return Ok(self
                .users
                .iter_mut()
                .filter(|u| u.email == email && u.status == "invited")
                .map(|u| {
                    u.status = "active".to_string();
                    row(json!({ "id": u.id, "email": u.email, "role": u.group }))
                })
                .collect());
        }

        if sql.starts_with("UPDATE cognition.users SET status = 'invited'") {
            let id = param("ID");
            for user in self.users.iter_mut().filter(|u| u.id == id) {
                user.status = "invited".to_string();
            }
            return Ok(Vec::new());
        }

        if sql.starts_with("SELECT status FROM cognition.users") {
            let email = param("EMAIL");
            return Ok(self
                .users
                .iter()
                .filter(|u| u.email == email)
                .map(|u| row(json!({ "status": u.status })))
                .collect());
        }

        // `SELECT ... AS echo` returns its parameters as one row.
        if sql.contains("AS echo") {
            let echoed = params
                .iter()
                .map(|(name, value)| (name.clone(), sql_to_json(value)))
                .collect();
            return Ok(vec![echoed]);
        }

        Ok(Vec::new())
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn duplicate(message: String, code: &str) -> DbError {
    DbError::QueryExecution {
        message,
        code: Some(code.to_string()),
    }
}

fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::from(*i),
        SqlValue::Float(f) => Value::from(*f),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Json(v) => v.clone(),
    }
}

fn delimited(sql: &str, quote: char) -> Vec<String> {
    sql.split(quote)
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

fn quoted_idents(sql: &str) -> Vec<String> {
    delimited(sql, '"')
}

/// Quoted identifiers, or the dotted name following the leading keywords
/// (`CREATE SCHEMA IF NOT EXISTS cognition`, `CREATE TABLE cognition.users`).
fn object_names(sql: &str) -> Vec<String> {
    let quoted = quoted_idents(sql);
    if !quoted.is_empty() {
        return quoted;
    }
    sql.split_whitespace()
        .skip(2)
        .find(|w| !matches!(*w, "IF" | "NOT" | "EXISTS"))
        .map(|w| {
            w.trim_end_matches(['(', ';'])
                .split('.')
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn quoted_literals(sql: &str) -> Vec<String> {
    delimited(sql, '\'')
}

pub struct FakeConnector {
    pub catalog: Arc<Mutex<Catalog>>,
    pub connects: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub targets: Mutex<Vec<ConnectTarget>>,
}

impl FakeConnector {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(Mutex::new(catalog)),
            connects: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        mode: ConnectionMode,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn QueryBackend>, DbError>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.clone());
            let backend: Box<dyn QueryBackend> = Box::new(FakeBackend {
                mode,
                username: target.credentials.username.clone(),
                catalog: self.catalog.clone(),
                closes: self.closes.clone(),
            });
            Ok(backend)
        })
    }
}

pub struct FakeBackend {
    mode: ConnectionMode,
    username: String,
    catalog: Arc<Mutex<Catalog>>,
    closes: Arc<AtomicUsize>,
}

impl QueryBackend for FakeBackend {
    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn execute<'a>(
        &'a self,
        statement: &'a Statement,
        options: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move {
            let mut catalog = self.catalog.lock().unwrap();
            catalog.executed.push(Executed {
                mode: self.mode,
                username: self.username.clone(),
                statement: statement.clone(),
                options: options.clone(),
            });
            if !options.script {
                return catalog.apply(&statement.sql, &statement.params);
            }
            // Scripts are all-or-nothing.
            let snapshot = (
                catalog.roles.clone(),
                catalog.schemas.clone(),
                catalog.tenants.clone(),
            );
            for sql in split_statements(&statement.sql) {
                if let Err(e) = catalog.apply(&sql, &[]) {
                    let (roles, schemas, tenants) = snapshot;
                    catalog.roles = roles;
                    catalog.schemas = schemas;
                    catalog.tenants = tenants;
                    return Err(e);
                }
            }
            Ok(Vec::new())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DbError>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn config() -> ClientConfig {
    ClientConfig {
        database: "app".to_string(),
        database_arn: Some("arn:aws:rds:us-east-1:123456789012:cluster:app-cluster".to_string()),
        database_host: Some("db.internal".to_string()),
        database_secret_arn: Some(APP_SECRET.to_string()),
        region: Some("us-east-1".to_string()),
        account: Some("123456789012".to_string()),
        mode: ConnectionMode::Instance,
        ..ClientConfig::default()
    }
}

pub struct Harness {
    pub client: DatabaseClient,
    pub store: Arc<MemoryStore>,
    pub assumer: Arc<FakeAssumer>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_config(config(), catalog)
    }

    pub fn with_config(config: ClientConfig, catalog: Catalog) -> Self {
        let store = Arc::new(MemoryStore::with(&[
            (APP_SECRET, APP_LOGIN),
            (AUDITOR_SECRET, AUDITOR_LOGIN),
        ]));
        let assumer = Arc::new(FakeAssumer {
            store: store.clone(),
            calls: AtomicUsize::new(0),
        });
        let connector = Arc::new(FakeConnector::new(catalog));
        let resolver = CredentialResolver::new(store.clone(), assumer.clone());
        let client = DatabaseClient::new(config, resolver, connector.clone())
            .expect("valid client config");
        Self {
            client,
            store,
            assumer,
            connector,
        }
    }

    pub fn catalog(&self) -> std::sync::MutexGuard<'_, Catalog> {
        self.connector.catalog.lock().unwrap()
    }
}
