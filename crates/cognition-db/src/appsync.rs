use cognition_core::config::ConnectionMode;
use cognition_core::events::{AppSyncEvent, AppSyncQuery};
use cognition_core::models::row::Row;
use serde_json::Value;
use tracing::debug;

use crate::client::{DatabaseClient, QueryOptions};
use crate::error::DbError;

impl DatabaseClient {
    /// Execute an AppSync resolver event in the configured mode.
    ///
    /// A single invocation yields an array of row objects; a batch yields one
    /// such array per item, in order.
    pub async fn resolve_appsync_query(
        &self,
        event: &AppSyncEvent,
        schema: Option<&str>,
    ) -> Result<Value, DbError> {
        self.resolve_appsync_in(self.config().mode, event, schema)
            .await
    }

    pub async fn resolve_instance_appsync_query(
        &self,
        event: &AppSyncEvent,
        schema: Option<&str>,
    ) -> Result<Value, DbError> {
        self.resolve_appsync_in(ConnectionMode::Instance, event, schema)
            .await
    }

    pub async fn resolve_serverless_appsync_query(
        &self,
        event: &AppSyncEvent,
        schema: Option<&str>,
    ) -> Result<Value, DbError> {
        self.resolve_appsync_in(ConnectionMode::Serverless, event, schema)
            .await
    }

    async fn resolve_appsync_in(
        &self,
        mode: ConnectionMode,
        event: &AppSyncEvent,
        schema: Option<&str>,
    ) -> Result<Value, DbError> {
        match event {
            AppSyncEvent::Single(query) => {
                let rows = self.run_resolver_query(mode, query, schema).await?;
                Ok(rows_to_value(rows))
            }
            AppSyncEvent::Batch(queries) => {
                debug!(items = queries.len(), "resolving batch");
                let mut results = Vec::with_capacity(queries.len());
                for query in queries {
                    let rows = self.run_resolver_query(mode, query, schema).await?;
                    results.push(rows_to_value(rows));
                }
                Ok(Value::Array(results))
            }
        }
    }

    async fn run_resolver_query(
        &self,
        mode: ConnectionMode,
        query: &AppSyncQuery,
        schema: Option<&str>,
    ) -> Result<Vec<Row>, DbError> {
        let mut options = QueryOptions::new().params(query.parameters.to_params());
        if let Some(schema) = schema {
            options = options.schema(schema);
        }
        self.run_in(mode, &query.query, options).await
    }
}

fn rows_to_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}
