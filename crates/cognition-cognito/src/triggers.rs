use cognition_core::events::CognitoTriggerEvent;
use cognition_core::models::claims::{self, ClaimSet};
use cognition_core::models::user::UserRecord;
use cognition_db::{DatabaseClient, QueryOptions};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::TriggerError;

const LOAD_USER: &str = "SELECT u.id, u.email, u.status, t.name AS tenant, \
     cognition.tenantrole(u.email, t.name::text) AS role \
     FROM cognition.users u \
     LEFT JOIN cognition.tenants t ON t.id = u.tenant_id \
     WHERE u.email = :EMAIL \
     LIMIT 1";

/// Cognito trigger checks backed by the `cognition.users` table.
///
/// The client should query with a login that can read every user, such as
/// `application_owner`.
pub struct CognitoTriggers<'a> {
    client: &'a DatabaseClient,
}

impl<'a> CognitoTriggers<'a> {
    pub fn new(client: &'a DatabaseClient) -> Self {
        Self { client }
    }

    /// The application user with `email`, with their tenant and tenant role.
    pub async fn load_user(&self, email: &str) -> Result<Option<UserRecord>, TriggerError> {
        let rows = self
            .client
            .run_query(LOAD_USER, QueryOptions::new().param("EMAIL", email))
            .await?;
        let Some(row) = rows.into_iter().next() else {
            debug!(email, "no application user");
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(Value::Object(row))?))
    }

    async fn user_for(
        &self,
        event: &CognitoTriggerEvent,
    ) -> Result<(String, Option<UserRecord>), TriggerError> {
        let email = event.email().ok_or(TriggerError::MissingEmail)?;
        let user = self.load_user(email).await?;
        Ok((email.to_string(), user))
    }

    /// Whether the user signing in exists and is active.
    pub async fn user_is_active(&self, event: &CognitoTriggerEvent) -> Result<bool, TriggerError> {
        let (_, user) = self.user_for(event).await?;
        Ok(user.is_some_and(|u| u.is_active()))
    }

    /// Whether the user signing up holds an open invitation.
    pub async fn user_is_invited(&self, event: &CognitoTriggerEvent) -> Result<bool, TriggerError> {
        let (_, user) = self.user_for(event).await?;
        Ok(user.is_some_and(|u| u.is_invited()))
    }

    /// Pre sign-up gate.
    pub async fn require_invited(
        &self,
        event: &CognitoTriggerEvent,
    ) -> Result<UserRecord, TriggerError> {
        match self.user_for(event).await? {
            (_, Some(user)) if user.is_invited() => Ok(user),
            (email, _) => Err(TriggerError::NotInvited(email)),
        }
    }

    /// Pre authentication gate.
    pub async fn require_active(
        &self,
        event: &CognitoTriggerEvent,
    ) -> Result<UserRecord, TriggerError> {
        match self.user_for(event).await? {
            (_, Some(user)) if user.is_active() => Ok(user),
            (email, _) => Err(TriggerError::NotActive(email)),
        }
    }

    /// Write the user's claims merged with `extra` into the event response
    /// and return them.
    pub async fn add_claims(
        &self,
        event: &mut CognitoTriggerEvent,
        extra: &ClaimSet,
    ) -> Result<ClaimSet, TriggerError> {
        let (email, user) = self.user_for(event).await?;
        let user = user.ok_or(TriggerError::UserNotFound(email))?;
        let claims = claims::add_claims(&user, extra);
        event.set_claims_override(&claims);
        info!(
            user_id = %user.id,
            claims = claims.len(),
            "claims added to token"
        );
        Ok(claims)
    }
}
