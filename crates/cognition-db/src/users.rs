//! Application users and their database logins.

use std::time::Duration;

use cognition_core::models::credentials::SecretBundle;
use cognition_core::models::row::column_strings;
use cognition_core::models::tenant::TenantRole;
use cognition_core::models::user::{UserRecord, UserStatus};
use cognition_secrets::CredentialError;
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};

use crate::client::{DatabaseClient, QueryOptions};
use crate::error::DbError;
use crate::params::quote_ident;
use crate::tenants::RoleSpec;

const PASSWORD_LEN: usize = 31;
const PASSWORD_CHARSET: &[u8] =
    b"!@#$%^&*()_-+=1234567890abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const SECRET_DELETE_POLL: Duration = Duration::from_secs(5);
const SECRET_DELETE_MAX_POLLS: usize = 12;

/// An invitation into a tenant.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub tenant: String,
    pub role: TenantRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Invitation expiry.
    pub expires_at: Option<jiff::Timestamp>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, tenant: impl Into<String>, role: TenantRole) -> Self {
        Self {
            email: email.into(),
            tenant: tenant.into(),
            role,
            first_name: None,
            last_name: None,
            expires_at: None,
        }
    }

    pub fn named(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn expires_at(mut self, at: jiff::Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// A user whose invitation was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedUser {
    /// Also the name of the user's login role.
    pub id: String,
    pub email: String,
    /// Group the login role was created in.
    pub group: String,
    pub secret_arn: String,
}

fn new_user_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("u{}", &hex[..30])
}

fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

/// `arn:aws:rds:...:cluster:name` -> `name`.
fn cluster_identifier(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

impl DatabaseClient {
    /// Invite `user` into their tenant. The row starts out `invited`; the
    /// database login is created once the user confirms their account.
    pub async fn create_cognition_user(&self, user: &NewUser) -> Result<UserRecord, DbError> {
        let tenant = self
            .get_tenant(&user.tenant)
            .await?
            .ok_or_else(|| DbError::TenantNotFound(user.tenant.clone()))?;

        let id = new_user_id();
        let group = user.role.group_for(&tenant.name);
        let invitation = json!({
            "tenant": tenant.name,
            "role": group,
            "invited_date": jiff::Timestamp::now().to_string(),
        });

        let result = self
            .run_query(
                "INSERT INTO cognition.users \
                 (id, email, first_name, last_name, status, expires_at, invitation_data, tenant_id) \
                 VALUES (:ID, :EMAIL, :FIRST_NAME, :LAST_NAME, 'invited', \
                 :EXPIRES::text::timestamptz, :INVITATION::text::jsonb, \
                 (SELECT id FROM cognition.tenants WHERE name = :TENANT)) \
                 RETURNING id, email, status",
                QueryOptions::new()
                    .param("ID", id.as_str())
                    .param("EMAIL", user.email.as_str())
                    .param("FIRST_NAME", user.first_name.as_deref())
                    .param("LAST_NAME", user.last_name.as_deref())
                    .param("EXPIRES", user.expires_at.map(|t| t.to_string()))
                    .param("INVITATION", invitation.to_string())
                    .param("TENANT", tenant.name.as_str()),
            )
            .await;

        match result {
            Ok(_) => {}
            Err(e) if e.sql_state() == Some("23505") => {
                return Err(DbError::Invitation {
                    email: user.email.clone(),
                    reason: "user already exists".to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        info!(
            user_id = %id,
            tenant = %tenant.name,
            group = %group,
            "user invited"
        );

        Ok(UserRecord {
            id,
            email: user.email.clone(),
            status: Some(UserStatus::Invited),
            tenant: Some(tenant.name),
            role: Some(user.role.as_str().to_string()),
        })
    }

    /// Activate the invited user with `email`: create their login role in the
    /// invitation's group and store its credentials at
    /// `{secretsPath}/{email}`. Any failure after activation is rolled back.
    pub async fn create_database_user(&self, email: &str) -> Result<ActivatedUser, DbError> {
        let host = self.config().require_database_host()?.to_string();

        let rows = self
            .run_query(
                "UPDATE cognition.users SET status = 'active', \
                 invitation_data = jsonb_set(COALESCE(invitation_data, '{}'::jsonb), \
                 '{accepted_date}', to_jsonb(now()::text)) \
                 WHERE email = :EMAIL AND status = 'invited' \
                 RETURNING id, email, invitation_data->>'role' AS role",
                QueryOptions::new().param("EMAIL", email),
            )
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Err(self.explain_missing_invitation(email).await);
        };
        let id = row
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DbError::UserNotFound(email.to_string()))?;
        let group = row.get("role").and_then(|v| v.as_str()).map(str::to_string);

        let mut role_created = false;
        match self
            .provision_login(email, &id, group.as_deref(), &host, &mut role_created)
            .await
        {
            Ok(activated) => {
                info!(user_id = %id, group = %activated.group, "database user created");
                Ok(activated)
            }
            Err(e) => {
                warn!(user_id = %id, error = %e, "database user creation failed, rolling back");
                self.roll_back_activation(&id, role_created).await;
                Err(e)
            }
        }
    }

    async fn explain_missing_invitation(&self, email: &str) -> DbError {
        let status = self
            .run_query(
                "SELECT status FROM cognition.users WHERE email = :EMAIL",
                QueryOptions::new().param("EMAIL", email),
            )
            .await;
        match status {
            Ok(rows) if rows.is_empty() => DbError::UserNotFound(email.to_string()),
            Ok(rows) => DbError::Invitation {
                email: email.to_string(),
                reason: format!(
                    "user status is {}",
                    column_strings(&rows, "status")
                        .first()
                        .map(String::as_str)
                        .unwrap_or("unset")
                ),
            },
            Err(e) => e,
        }
    }

    async fn provision_login(
        &self,
        email: &str,
        id: &str,
        group: Option<&str>,
        host: &str,
        role_created: &mut bool,
    ) -> Result<ActivatedUser, DbError> {
        let group = group.ok_or_else(|| DbError::Invitation {
            email: email.to_string(),
            reason: "invitation carries no role".to_string(),
        })?;

        let password = generate_password();
        self.create_role(&RoleSpec::new(id).login(password.as_str()).in_role(group))
            .await?;
        *role_created = true;

        let config = self.config();
        let secret_name = config.user_secret_name(email);
        self.replace_secret(&secret_name).await?;

        let bundle = SecretBundle {
            db_cluster_identifier: config
                .database_arn
                .as_deref()
                .map(|arn| cluster_identifier(arn).to_string()),
            engine: "postgres".to_string(),
            host: host.to_string(),
            password,
            port: config.database_port,
            username: id.to_string(),
            dbname: Some(config.database.clone()),
        };
        let secret_arn = self
            .create_secret(&secret_name, &bundle, &format!("Database login for {email}"))
            .await?;

        Ok(ActivatedUser {
            id: id.to_string(),
            email: email.to_string(),
            group: group.to_string(),
            secret_arn,
        })
    }

    /// Delete any previous secret under `name` and wait for the deletion to
    /// complete so the name can be reused.
    async fn replace_secret(&self, name: &str) -> Result<(), DbError> {
        let store = self.resolver().store();
        if !store.secret_exists(name).await? {
            return Ok(());
        }
        match store.delete_secret(name, true).await {
            Ok(()) | Err(CredentialError::SecretNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        for _ in 0..SECRET_DELETE_MAX_POLLS {
            if !store.secret_exists(name).await? {
                return Ok(());
            }
            tokio::time::sleep(SECRET_DELETE_POLL).await;
        }
        Err(DbError::Timeout(format!("deletion of secret {name}")))
    }

    /// Undo a failed activation. Secret creation is the last step, so there
    /// is never a secret to remove here.
    async fn roll_back_activation(&self, id: &str, role_created: bool) {
        let reset = self
            .run_query(
                "UPDATE cognition.users SET status = 'invited' WHERE id = :ID",
                QueryOptions::new().param("ID", id),
            )
            .await;
        if let Err(e) = reset {
            warn!(user_id = %id, error = %e, "rollback: failed to reset user status");
        }

        if role_created {
            let drop = format!("DROP ROLE IF EXISTS {}", quote_ident(id));
            if let Err(e) = self.run_query(&drop, QueryOptions::new()).await {
                warn!(user_id = %id, error = %e, "rollback: failed to drop role");
            }
        }
    }

    /// Store a credential bundle as a new secret. Returns its ARN.
    pub async fn create_secret(
        &self,
        name: &str,
        bundle: &SecretBundle,
        description: &str,
    ) -> Result<String, DbError> {
        self.ensure_usable().await?;
        let value = serde_json::to_string(bundle)?;
        Ok(self
            .resolver()
            .store()
            .create_secret(name, description, &value)
            .await?)
    }

    /// Delete a secret immediately, without a recovery window.
    pub async fn delete_secret(&self, id: &str) -> Result<(), DbError> {
        self.ensure_usable().await?;
        self.resolver()
            .store()
            .delete_secret(id, true)
            .await
            .map_err(|e| match e {
                CredentialError::SecretNotFound(id) => DbError::SecretNotFound(id),
                other => DbError::Credential(other),
            })
    }
}
