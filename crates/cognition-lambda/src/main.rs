use std::sync::Arc;

use cognition_core::config::ClientConfig;
use cognition_db::AwsConnector;
use cognition_secrets::CredentialResolver;
use cognition_secrets::client::build_sdk_config;
use lambda_http::lambda_runtime::{self, LambdaEvent};
use lambda_http::service_fn;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod error;
mod handlers;
mod state;

use handlers::Handler;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Structured JSON logging for CloudWatch
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let handler: Handler = std::env::var("COGNITION_HANDLER")
        .map_err(|_| eyre::eyre!("COGNITION_HANDLER is not set"))?
        .parse()?;
    let extra_claims = state::extra_claims_from(std::env::var("COGNITION_EXTRA_CLAIMS").ok())?;

    let config = ClientConfig::from_env();
    config.validate()?;

    let sdk_config = build_sdk_config(config.region.as_deref()).await;
    let state = Arc::new(AppState {
        resolver: CredentialResolver::from_sdk_config(&sdk_config),
        connector: Arc::new(AwsConnector::new(sdk_config)),
        config,
        handler,
        extra_claims,
    });
    tracing::info!(handler = handler.as_str(), "cognition handler starting");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let state = state.clone();
        async move {
            handlers::handle(&state, event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
    .map_err(|e| eyre::eyre!(e))
}
