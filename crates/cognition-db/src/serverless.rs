use aws_config::SdkConfig;
use aws_sdk_rdsdata::Client;
use aws_sdk_rdsdata::error::ProvideErrorMetadata;
use aws_sdk_rdsdata::types::{ArrayValue, ColumnMetadata, Field, SqlParameter, TypeHint};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cognition_core::config::ConnectionMode;
use cognition_core::error::ConfigError;
use cognition_core::models::row::{Row, SqlValue, Statement};
use cognition_secrets::BoxFuture;
use cognition_secrets::error::format_err_chain;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{ConnectTarget, ExecOptions, QueryBackend};
use crate::error::DbError;
use crate::params::{quote_ident, split_statements};

/// Statement execution through the RDS Data API.
pub struct ServerlessBackend {
    client: Client,
    resource_arn: String,
    secret_arn: String,
    database: String,
}

impl ServerlessBackend {
    pub fn new(sdk_config: &SdkConfig, target: &ConnectTarget) -> Result<Self, DbError> {
        let resource_arn = target
            .database_arn
            .clone()
            .filter(|arn| !arn.trim().is_empty())
            .ok_or(ConfigError::Missing("databaseArn"))?;

        let mut builder = aws_sdk_rdsdata::config::Builder::from(sdk_config);
        if let Some(session) = &target.session {
            builder = builder.credentials_provider(session.provider());
        }

        debug!(
            resource_arn = %resource_arn,
            database = %target.database,
            assumed = target.session.is_some(),
            "data api client ready"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            resource_arn,
            secret_arn: target.credentials.secret.to_string(),
            database: target.database.clone(),
        })
    }

    async fn run(
        &self,
        sql: &str,
        parameters: Vec<SqlParameter>,
        transaction_id: Option<&str>,
    ) -> Result<Vec<Row>, DbError> {
        let resp = self
            .client
            .execute_statement()
            .resource_arn(&self.resource_arn)
            .secret_arn(&self.secret_arn)
            .database(&self.database)
            .sql(sql)
            .set_parameters(Some(parameters))
            .set_transaction_id(transaction_id.map(str::to_string))
            .include_result_metadata(true)
            .send()
            .await
            .map_err(|e| data_api_error(e.into_service_error()))?;

        Ok(records_to_rows(resp.column_metadata(), resp.records()))
    }

    async fn begin(&self) -> Result<String, DbError> {
        let resp = self
            .client
            .begin_transaction()
            .resource_arn(&self.resource_arn)
            .secret_arn(&self.secret_arn)
            .database(&self.database)
            .send()
            .await
            .map_err(|e| data_api_error(e.into_service_error()))?;

        resp.transaction_id()
            .map(str::to_string)
            .ok_or_else(|| DbError::query("BeginTransaction returned no transaction id"))
    }

    async fn commit(&self, transaction_id: &str) -> Result<(), DbError> {
        self.client
            .commit_transaction()
            .resource_arn(&self.resource_arn)
            .secret_arn(&self.secret_arn)
            .transaction_id(transaction_id)
            .send()
            .await
            .map_err(|e| data_api_error(e.into_service_error()))?;
        Ok(())
    }

    async fn rollback(&self, transaction_id: &str) {
        let result = self
            .client
            .rollback_transaction()
            .resource_arn(&self.resource_arn)
            .secret_arn(&self.secret_arn)
            .transaction_id(transaction_id)
            .send()
            .await;
        if let Err(e) = result {
            warn!(
                transaction_id,
                error = %format_err_chain(&e.into_service_error()),
                "rollback failed"
            );
        }
    }

    async fn run_in_transaction(
        &self,
        statement: &Statement,
        parameters: Vec<SqlParameter>,
        options: &ExecOptions,
        transaction_id: &str,
    ) -> Result<Vec<Row>, DbError> {
        if let Some(schema) = &options.schema {
            let sql = format!("SET LOCAL search_path TO {}, public", quote_ident(schema));
            self.run(&sql, Vec::new(), Some(transaction_id)).await?;
        }
        if let Some(role) = &options.pg_role {
            let sql = format!("SET LOCAL ROLE {}", quote_ident(role));
            self.run(&sql, Vec::new(), Some(transaction_id)).await?;
        }

        if options.script {
            // The Data API runs one statement per call.
            for sql in split_statements(&statement.sql) {
                self.run(&sql, Vec::new(), Some(transaction_id)).await?;
            }
            return Ok(Vec::new());
        }

        self.run(&statement.sql, parameters, Some(transaction_id))
            .await
    }
}

impl QueryBackend for ServerlessBackend {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Serverless
    }

    fn execute<'a>(
        &'a self,
        statement: &'a Statement,
        options: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move {
            let parameters: Vec<SqlParameter> = statement
                .params
                .iter()
                .map(|(name, value)| to_parameter(name, value))
                .collect();

            if !options.needs_transaction() {
                let rows = self.run(&statement.sql, parameters, None).await?;
                debug!(rows = rows.len(), "serverless query executed");
                return Ok(rows);
            }

            let transaction_id = self.begin().await?;
            match self
                .run_in_transaction(statement, parameters, options, &transaction_id)
                .await
            {
                Ok(rows) => {
                    self.commit(&transaction_id).await?;
                    debug!(rows = rows.len(), "serverless transaction committed");
                    Ok(rows)
                }
                Err(e) => {
                    self.rollback(&transaction_id).await;
                    Err(e)
                }
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DbError>> {
        // Stateless transport: nothing to release beyond the client itself.
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

pub(crate) fn to_parameter(name: &str, value: &SqlValue) -> SqlParameter {
    let builder = SqlParameter::builder().name(name);
    match value {
        SqlValue::Null => builder.value(Field::IsNull(true)),
        SqlValue::Bool(b) => builder.value(Field::BooleanValue(*b)),
        SqlValue::Int(i) => builder.value(Field::LongValue(*i)),
        SqlValue::Float(f) => builder.value(Field::DoubleValue(*f)),
        SqlValue::Text(s) => builder.value(Field::StringValue(s.clone())),
        SqlValue::Json(v) => builder
            .value(Field::StringValue(v.to_string()))
            .type_hint(TypeHint::Json),
    }
    .build()
}

pub(crate) fn records_to_rows(columns: &[ColumnMetadata], records: &[Vec<Field>]) -> Vec<Row> {
    records
        .iter()
        .map(|record| {
            record
                .iter()
                .enumerate()
                .map(|(idx, field)| {
                    let meta = columns.get(idx);
                    let name = meta
                        .and_then(|c| c.label().or(c.name()))
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("column{idx}"));
                    let type_name = meta.and_then(|c| c.type_name()).unwrap_or_default();
                    (name, field_to_json(field, type_name))
                })
                .collect()
        })
        .collect()
}

pub(crate) fn field_to_json(field: &Field, type_name: &str) -> Value {
    match field {
        Field::IsNull(_) => Value::Null,
        Field::BooleanValue(b) => Value::Bool(*b),
        Field::LongValue(i) => Value::from(*i),
        Field::DoubleValue(f) => Value::from(*f),
        Field::StringValue(s) if matches!(type_name, "json" | "jsonb") => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Field::StringValue(s) => Value::String(s.clone()),
        Field::BlobValue(blob) => Value::String(BASE64.encode(blob.as_ref())),
        Field::ArrayValue(array) => array_to_json(array),
        _ => Value::Null,
    }
}

pub(crate) fn array_to_json(array: &ArrayValue) -> Value {
    match array {
        ArrayValue::BooleanValues(v) => v.iter().copied().map(Value::from).collect(),
        ArrayValue::LongValues(v) => v.iter().copied().map(Value::from).collect(),
        ArrayValue::DoubleValues(v) => v.iter().copied().map(Value::from).collect(),
        ArrayValue::StringValues(v) => v.iter().cloned().map(Value::from).collect(),
        ArrayValue::ArrayValues(v) => v
            .iter()
            .map(|inner| inner.as_ref().map(array_to_json).unwrap_or(Value::Null))
            .collect(),
        _ => Value::Null,
    }
}

fn data_api_error<E>(err: E) -> DbError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format_err_chain(&err));
    let code = sql_state(&message).map(str::to_string);
    DbError::QueryExecution { message, code }
}

/// Data API errors carry the server's SQLSTATE as `...; SQLState: 42710`.
pub(crate) fn sql_state(message: &str) -> Option<&str> {
    let (_, rest) = message.rsplit_once("SQLState: ")?;
    let code = rest.get(..5)?;
    code.bytes()
        .all(|b| b.is_ascii_alphanumeric())
        .then_some(code)
}
