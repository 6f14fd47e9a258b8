#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cognition_core::config::{ClientConfig, ConnectionMode};
use cognition_core::models::credentials::RoleOverride;
use cognition_core::events::CognitoTriggerEvent;
use cognition_core::models::row::{Row, SqlValue, Statement};
use cognition_db::instance::InstanceBackend;
use cognition_db::{ConnectTarget, Connector, DatabaseClient, DbError, ExecOptions, QueryBackend};
use cognition_secrets::{
    BoxFuture, CredentialError, CredentialResolver, RoleAssumer, ScopedSecrets, SecretStore,
};
use serde_json::{Value, json};

pub const SECRET: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:owner";

/// Holds the one application-owner login.
pub struct OwnerSecret;

impl SecretStore for OwnerSecret {
    fn get_secret_string<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            if id == SECRET {
                Ok(r#"{"host":"db.internal","password":"pw","username":"application_owner"}"#
                    .to_string())
            } else {
                Err(CredentialError::SecretNotFound(id.to_string()))
            }
        })
    }

    fn create_secret<'a>(
        &'a self,
        _name: &'a str,
        _description: &'a str,
        _value: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async { Err(CredentialError::SecretsManager("read only".to_string())) })
    }

    fn delete_secret<'a>(
        &'a self,
        id: &'a str,
        _force: bool,
    ) -> BoxFuture<'a, Result<(), CredentialError>> {
        Box::pin(async move { Err(CredentialError::SecretNotFound(id.to_string())) })
    }

    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>> {
        Box::pin(async move { Ok(id == SECRET) })
    }
}

pub struct NoRoles;

impl RoleAssumer for NoRoles {
    fn assume_role<'a>(
        &'a self,
        role: &'a RoleOverride,
    ) -> BoxFuture<'a, Result<ScopedSecrets, CredentialError>> {
        Box::pin(async move {
            Err(CredentialError::AssumeRole {
                role_arn: role.role_arn.clone(),
                message: "not permitted".to_string(),
            })
        })
    }
}

/// Answers user lookups from a fixed list of rows keyed by email.
#[derive(Clone, Default)]
pub struct Users {
    pub rows: Arc<Mutex<Vec<Row>>>,
    pub queries: Arc<Mutex<Vec<Statement>>>,
}

impl Users {
    pub fn add(&self, email: &str, status: &str, tenant: Option<&str>, role: Option<&str>) {
        let row = json!({
            "id": format!("u{}", self.rows.lock().unwrap().len()),
            "email": email,
            "status": status,
            "tenant": tenant,
            "role": role,
        });
        if let Value::Object(row) = row {
            self.rows.lock().unwrap().push(row);
        }
    }
}

impl Connector for Users {
    fn connect<'a>(
        &'a self,
        _mode: ConnectionMode,
        _target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn QueryBackend>, DbError>> {
        Box::pin(async move {
            let backend: Box<dyn QueryBackend> = Box::new(self.clone());
            Ok(backend)
        })
    }
}

impl QueryBackend for Users {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Serverless
    }

    fn execute<'a>(
        &'a self,
        statement: &'a Statement,
        _options: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(statement.clone());
            let email = match statement.param("EMAIL") {
                Some(SqlValue::Text(email)) => email.clone(),
                _ => return Err(DbError::query("no value bound for :EMAIL")),
            };
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.get("email").and_then(Value::as_str) == Some(email.as_str()))
                .take(1)
                .cloned()
                .collect())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DbError>> {
        Box::pin(async { Ok(()) })
    }
}

pub fn client(users: &Users) -> DatabaseClient {
    let config = ClientConfig {
        database: "app".to_string(),
        database_arn: Some("arn:aws:rds:us-east-1:123456789012:cluster:app".to_string()),
        database_secret_arn: Some(SECRET.to_string()),
        ..ClientConfig::default()
    };
    let resolver = CredentialResolver::new(Arc::new(OwnerSecret), Arc::new(NoRoles));
    DatabaseClient::new(config, resolver, Arc::new(users.clone())).expect("valid client config")
}

pub fn trigger(email: Option<&str>) -> CognitoTriggerEvent {
    let attributes = match email {
        Some(email) => json!({ "email": email, "sub": "0b6c7d4e" }),
        None => json!({ "sub": "0b6c7d4e" }),
    };
    serde_json::from_value(json!({
        "version": "1",
        "triggerSource": "TokenGeneration_Authentication",
        "userPoolId": "us-east-1_abc",
        "userName": "jane",
        "request": { "userAttributes": attributes, "groupConfiguration": {} },
        "response": {}
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Real PostgreSQL, for the ignored end-to-end tests
// ---------------------------------------------------------------------------

pub const PG_SECRET: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:postgres";

/// Secrets kept in memory; seeded with a superuser login taken from the
/// usual `PG*` variables.
#[derive(Default)]
pub struct LocalSecrets {
    pub secrets: Mutex<HashMap<String, String>>,
}

impl LocalSecrets {
    pub fn from_pg_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        let login = json!({
            "engine": "postgres",
            "host": var("PGHOST", "localhost"),
            "port": var("PGPORT", "5432").parse::<u16>().unwrap(),
            "username": var("PGUSER", "postgres"),
            "password": var("PGPASSWORD", "postgres"),
        });
        let store = Self::default();
        store
            .secrets
            .lock()
            .unwrap()
            .insert(PG_SECRET.to_string(), login.to_string());
        store
    }
}

impl SecretStore for LocalSecrets {
    fn get_secret_string<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            self.secrets
                .lock()
                .unwrap()
                .get(id)
                .cloned()
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
            self.secrets
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            Ok(name.to_string())
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
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| CredentialError::SecretNotFound(id.to_string()))
        })
    }

    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>> {
        Box::pin(async move { Ok(self.secrets.lock().unwrap().contains_key(id)) })
    }
}

/// Opens direct connections only.
pub struct PgConnector;

impl Connector for PgConnector {
    fn connect<'a>(
        &'a self,
        _mode: ConnectionMode,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn QueryBackend>, DbError>> {
        Box::pin(async move {
            let backend: Box<dyn QueryBackend> =
                Box::new(InstanceBackend::connect(target).await?);
            Ok(backend)
        })
    }
}

pub fn postgres_client() -> DatabaseClient {
    let config = ClientConfig {
        database: std::env::var("PGDATABASE").unwrap_or_else(|_| "postgres".to_string()),
        database_host: Some(std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string())),
        database_secret_arn: Some(PG_SECRET.to_string()),
        mode: ConnectionMode::Instance,
        ..ClientConfig::default()
    };
    let resolver =
        CredentialResolver::new(Arc::new(LocalSecrets::from_pg_env()), Arc::new(NoRoles));
    DatabaseClient::new(config, resolver, Arc::new(PgConnector)).expect("valid client config")
}
