use std::str::FromStr;

use cognition_cognito::{CognitoTriggers, TriggerError};
use cognition_core::events::{AppSyncEvent, CognitoTriggerEvent};
use cognition_db::DatabaseClient;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::HandlerError;
use crate::state::AppState;

/// Which event this function is deployed for (`COGNITION_HANDLER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Reject sign-up of uninvited users.
    PreSignUp,
    /// Reject sign-in of inactive users.
    PreAuthentication,
    /// Create the database login of a confirmed user.
    PostConfirmation,
    /// Add tenant claims to the identity token.
    PreTokenGeneration,
    /// Run an AppSync resolver query as the caller.
    AppSync,
}

impl Handler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreSignUp => "pre_signup",
            Self::PreAuthentication => "pre_authentication",
            Self::PostConfirmation => "post_confirmation",
            Self::PreTokenGeneration => "pre_token_generation",
            Self::AppSync => "appsync",
        }
    }
}

impl FromStr for Handler {
    type Err = HandlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre_signup" | "presignup" => Ok(Self::PreSignUp),
            "pre_authentication" | "preauthentication" => Ok(Self::PreAuthentication),
            "post_confirmation" | "postconfirmation" => Ok(Self::PostConfirmation),
            "pre_token_generation" | "pretokengeneration" => Ok(Self::PreTokenGeneration),
            "appsync" => Ok(Self::AppSync),
            other => Err(HandlerError::UnknownHandler(other.to_string())),
        }
    }
}

/// Handle one invocation with a fresh client, closing it afterwards.
pub async fn handle(state: &AppState, payload: Value) -> Result<Value, HandlerError> {
    if state.handler == Handler::AppSync {
        let event: AppSyncEvent = serde_json::from_value(payload)?;
        let client = state.caller_client(event.identity())?;
        let result = client
            .resolve_appsync_query(&event, None)
            .await
            .map_err(HandlerError::from);
        return finish(client, result).await;
    }

    let mut event: CognitoTriggerEvent = serde_json::from_value(payload)?;
    let client = state.client()?;
    let result = run_trigger(state, &client, &mut event).await;
    finish(client, result).await?;
    Ok(serde_json::to_value(&event)?)
}

async fn finish<T>(
    client: DatabaseClient,
    result: Result<T, HandlerError>,
) -> Result<T, HandlerError> {
    if let Err(e) = client.close().await {
        warn!(error = %e, "failed to close database client");
    }
    result
}

async fn run_trigger(
    state: &AppState,
    client: &DatabaseClient,
    event: &mut CognitoTriggerEvent,
) -> Result<(), HandlerError> {
    let triggers = CognitoTriggers::new(client);
    match state.handler {
        Handler::PreSignUp => {
            triggers.require_invited(event).await?;
        }
        Handler::PreAuthentication => {
            triggers.require_active(event).await?;
        }
        Handler::PostConfirmation => {
            let email = event.email().ok_or(TriggerError::MissingEmail)?;
            let user = client.create_database_user(email).await?;
            info!(user_id = %user.id, group = %user.group, "account confirmed");
        }
        Handler::PreTokenGeneration => {
            triggers.add_claims(event, &state.extra_claims).await?;
        }
        Handler::AppSync => {}
    }
    Ok(())
}
