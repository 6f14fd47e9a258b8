use std::sync::Arc;

use cognition_core::config::ClientConfig;
use cognition_core::events::AppSyncIdentity;
use cognition_core::models::claims::ClaimSet;
use cognition_db::{Connector, DatabaseClient};
use cognition_secrets::CredentialResolver;

use crate::error::HandlerError;
use crate::handlers::Handler;

/// Shared across invocations. Database clients are per event.
pub struct AppState {
    pub config: ClientConfig,
    pub resolver: CredentialResolver,
    pub connector: Arc<dyn Connector>,
    pub handler: Handler,
    /// Added to every token by `pre_token_generation`.
    pub extra_claims: ClaimSet,
}

impl AppState {
    /// A client querying with the configured secret.
    pub fn client(&self) -> Result<DatabaseClient, HandlerError> {
        Ok(DatabaseClient::new(
            self.config.clone(),
            self.resolver.clone(),
            self.connector.clone(),
        )?)
    }

    /// A client querying as the AppSync caller unless a secret is configured.
    pub fn caller_client(
        &self,
        identity: Option<&AppSyncIdentity>,
    ) -> Result<DatabaseClient, HandlerError> {
        Ok(DatabaseClient::for_caller(
            self.config.clone(),
            identity,
            self.resolver.clone(),
            self.connector.clone(),
        )?)
    }
}

/// `COGNITION_EXTRA_CLAIMS`: a JSON object of string claims.
pub fn extra_claims_from(raw: Option<String>) -> Result<ClaimSet, HandlerError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(ClaimSet::new()),
        Some(raw) => Ok(serde_json::from_str(raw)?),
    }
}
