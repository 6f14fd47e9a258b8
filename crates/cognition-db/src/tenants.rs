//! Tenant provisioning and membership lookups.

use cognition_core::models::row::column_strings;
use cognition_core::models::tenant::{Tenant, TenantRole};
use serde_json::Value;
use tracing::info;

use crate::client::{DatabaseClient, QueryOptions};
use crate::error::DbError;
use crate::params::{quote_ident, quote_literal, validate_identifier};

/// A database role to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    /// Group the new role becomes a member of.
    pub in_role: Option<String>,
    /// Makes the role a login role.
    pub password: Option<String>,
    /// Treat an existing role as success instead of a conflict.
    pub if_not_exists: bool,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_role: None,
            password: None,
            if_not_exists: false,
        }
    }

    pub fn in_role(mut self, group: impl Into<String>) -> Self {
        self.in_role = Some(group.into());
        self
    }

    pub fn login(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    fn create_sql(&self) -> String {
        let mut sql = format!("CREATE ROLE {}", quote_ident(&self.name));
        if let Some(password) = &self.password {
            sql.push_str(&format!(" WITH LOGIN PASSWORD {}", quote_literal(password)));
        }
        if let Some(group) = &self.in_role {
            sql.push_str(&format!(" IN ROLE {}", quote_ident(group)));
        }
        sql
    }
}

impl DatabaseClient {
    /// Create a role. Returns `false` when it already existed and
    /// `if_not_exists` was set.
    pub async fn create_role(&self, spec: &RoleSpec) -> Result<bool, DbError> {
        validate_identifier(&spec.name)?;
        if let Some(group) = &spec.in_role {
            validate_identifier(group)?;
        }

        if self.role_exists(&spec.name).await? {
            return if spec.if_not_exists {
                info!(role = %spec.name, "role already exists, skipping");
                Ok(false)
            } else {
                Err(DbError::RoleConflict(spec.name.clone()))
            };
        }

        match self.run_query(&spec.create_sql(), QueryOptions::new()).await {
            Ok(_) => {
                info!(
                    role = %spec.name,
                    in_role = spec.in_role.as_deref(),
                    login = spec.password.is_some(),
                    "role created"
                );
                Ok(true)
            }
            // Lost a race with a concurrent creator.
            Err(e) if e.is_duplicate() && spec.if_not_exists => Ok(false),
            Err(e) if e.is_duplicate() => Err(DbError::RoleConflict(spec.name.clone())),
            Err(e) => Err(e),
        }
    }

    pub async fn role_exists(&self, name: &str) -> Result<bool, DbError> {
        let rows = self
            .run_query(
                "SELECT rolname FROM pg_roles WHERE rolname = :NAME",
                QueryOptions::new().param("NAME", name),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Copy every table of schema `template` into a new schema named after
    /// `tenant`, create the tenant's `_admins` / `_users` groups and register
    /// the tenant. Runs as one transaction.
    pub async fn clone_schema(&self, template: &str, tenant: &Tenant) -> Result<Tenant, DbError> {
        validate_identifier(template)?;
        validate_identifier(&tenant.name)?;

        let existing = self
            .run_query(
                "SELECT nspname FROM pg_namespace WHERE nspname IN (:TEMPLATE, :TENANT)",
                QueryOptions::new()
                    .param("TEMPLATE", template)
                    .param("TENANT", tenant.name.as_str()),
            )
            .await?;
        let existing = column_strings(&existing, "nspname");
        if !existing.iter().any(|s| s == template) {
            return Err(DbError::SchemaClone(format!(
                "template schema {template} does not exist"
            )));
        }
        if existing.iter().any(|s| *s == tenant.name) {
            return Err(DbError::SchemaClone(format!(
                "schema {} already exists",
                tenant.name
            )));
        }

        let tables = self
            .run_query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = :TEMPLATE AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                QueryOptions::new().param("TEMPLATE", template),
            )
            .await?;
        let tables = column_strings(&tables, "table_name");

        let script = clone_script(template, tenant, &tables);
        self.run_query(&script, QueryOptions::new().script())
            .await
            .map_err(|e| DbError::SchemaClone(e.to_string()))?;

        info!(
            tenant = %tenant.name,
            template,
            tables = tables.len(),
            "tenant schema cloned"
        );

        self.get_tenant(&tenant.name)
            .await?
            .ok_or_else(|| DbError::SchemaClone(format!("tenant {} was not registered", tenant.name)))
    }

    pub async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, DbError> {
        let rows = self
            .run_query(
                "SELECT id::text AS id, name, displayname FROM cognition.tenants WHERE name = :NAME",
                QueryOptions::new().param("NAME", name),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(DbError::from))
            .transpose()
    }

    /// Tenant names. With `user`, only the tenants that database user is a
    /// member of; without, every registered tenant.
    pub async fn get_tenants(&self, user: Option<&str>) -> Result<Vec<String>, DbError> {
        let rows = match user {
            Some(user) => {
                self.run_query(
                    "SELECT DISTINCT t.name FROM cognition.gettenants(:USERNAME) AS g(name) \
                     JOIN cognition.tenants t ON t.name = g.name ORDER BY t.name",
                    QueryOptions::new().param("USERNAME", user),
                )
                .await?
            }
            None => {
                self.run_query(
                    "SELECT name FROM cognition.tenants ORDER BY name",
                    QueryOptions::new(),
                )
                .await?
            }
        };
        Ok(column_strings(&rows, "name"))
    }

    /// Every role `user` is a member of, directly or indirectly.
    pub async fn groups_of(&self, user: &str) -> Result<Vec<String>, DbError> {
        let rows = self
            .run_query(
                "SELECT g AS name FROM cognition.groupsof(:USERNAME) AS g ORDER BY 1",
                QueryOptions::new().param("USERNAME", user),
            )
            .await?;
        Ok(column_strings(&rows, "name"))
    }

    /// `admin` or `user` when the application user with `email` belongs to
    /// `tenant`.
    pub async fn get_tenant_role(
        &self,
        email: &str,
        tenant: &str,
    ) -> Result<Option<TenantRole>, DbError> {
        let rows = self
            .run_query(
                "SELECT cognition.tenantrole(:EMAIL, :TENANT) AS role",
                QueryOptions::new()
                    .param("EMAIL", email)
                    .param("TENANT", tenant),
            )
            .await?;
        column_strings(&rows, "role")
            .first()
            .map(|role| role.parse::<TenantRole>().map_err(DbError::from))
            .transpose()
    }
}

fn clone_script(template: &str, tenant: &Tenant, tables: &[String]) -> String {
    let schema = quote_ident(&tenant.name);
    let admins = TenantRole::Admin.group_for(&tenant.name);
    let users = TenantRole::User.group_for(&tenant.name);

    let mut sql = format!("CREATE SCHEMA {schema};\n");
    for table in tables {
        sql.push_str(&format!(
            "CREATE TABLE {schema}.{t} (LIKE {template}.{t} INCLUDING ALL);\n",
            t = quote_ident(table),
            template = quote_ident(template),
        ));
    }
    for (group, parent) in [(&admins, TenantRole::Admin), (&users, TenantRole::User)] {
        sql.push_str(&format!(
            "SELECT cognition.createrole({}, {}, NULL);\n",
            quote_literal(group),
            quote_literal(parent.global_group()),
        ));
    }
    sql.push_str(&format!(
        "GRANT USAGE ON SCHEMA {schema} TO {}, {};\n",
        quote_ident(&admins),
        quote_ident(&users),
    ));
    sql.push_str(&format!(
        "GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA {schema} TO {};\n",
        quote_ident(&admins),
    ));
    sql.push_str(&format!(
        "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {schema} TO {};\n",
        quote_ident(&users),
    ));
    sql.push_str(&format!(
        "INSERT INTO cognition.tenants (name, displayname) VALUES ({}, {});\n",
        quote_literal(&tenant.name),
        quote_literal(&tenant.displayname),
    ));
    sql
}
