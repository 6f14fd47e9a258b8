use std::error::Error as StdError;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use cognition_core::config::ConnectionMode;
use cognition_core::error::ConfigError;
use cognition_core::models::row::{Row, SqlValue, Statement};
use cognition_secrets::BoxFuture;
use jiff::Timestamp;
use jiff::civil::{Date, DateTime, Time};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::{debug, info, warn};

use crate::backend::{ConnectTarget, ExecOptions, QueryBackend};
use crate::error::DbError;
use crate::params::{quote_ident, to_positional};

type BoxError = Box<dyn StdError + Sync + Send>;

/// Direct PostgreSQL connection.
pub struct InstanceBackend {
    client: Mutex<Client>,
    connection: JoinHandle<()>,
}

impl InstanceBackend {
    pub async fn connect(target: &ConnectTarget) -> Result<Self, DbError> {
        let creds = &target.credentials;
        let host = if creds.host.is_empty() {
            target
                .fallback_host
                .as_deref()
                .ok_or(ConfigError::Missing("databaseHost"))?
        } else {
            creds.host.as_str()
        };

        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(creds.port)
            .user(creds.username.as_str())
            .password(creds.password.as_str())
            .dbname(target.database.as_str())
            .application_name("pg-cognition");

        let (client, connection) = config.connect(NoTls).await?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "database connection closed with error");
            }
        });

        info!(
            host = %host,
            database = %target.database,
            user = %creds.username,
            "connected to database instance"
        );

        Ok(Self {
            client: Mutex::new(client),
            connection,
        })
    }
}

impl QueryBackend for InstanceBackend {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Instance
    }

    fn execute<'a>(
        &'a self,
        statement: &'a Statement,
        options: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move {
            let mut client = self.client.lock().await;

            if options.script {
                let tx = client.transaction().await?;
                apply_session_settings(&tx, options).await?;
                tx.batch_execute(&statement.sql).await?;
                tx.commit().await?;
                debug!("instance script executed");
                return Ok(Vec::new());
            }

            let (sql, values) = to_positional(&statement.sql, &statement.params)?;
            let params: Vec<PgParam> = values.into_iter().map(PgParam).collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            let rows = if options.needs_transaction() {
                let tx = client.transaction().await?;
                apply_session_settings(&tx, options).await?;
                let rows = tx.query(&sql, &refs).await?;
                tx.commit().await?;
                rows
            } else {
                client.query(&sql, &refs).await?
            };

            debug!(rows = rows.len(), "instance query executed");
            rows.iter().map(row_to_json).collect()
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DbError>> {
        Box::pin(async move {
            let Self { client, connection } = *self;
            // Dropping the client ends the connection task.
            drop(client);
            if let Err(e) = connection.await {
                warn!(error = %e, "database connection task failed");
            }
            debug!("instance connection closed");
            Ok(())
        })
    }
}

async fn apply_session_settings(
    tx: &Transaction<'_>,
    options: &ExecOptions,
) -> Result<(), DbError> {
    if let Some(schema) = &options.schema {
        tx.batch_execute(&format!(
            "SET LOCAL search_path TO {}, public",
            quote_ident(schema)
        ))
        .await?;
    }
    if let Some(role) = &options.pg_role {
        tx.batch_execute(&format!("SET LOCAL ROLE {}", quote_ident(role)))
            .await?;
    }
    Ok(())
}

fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get::<_, Option<RawColumn<'_>>>(idx)?;
        let value = column_to_json(column.type_(), raw.map(|r| r.0))
            .map_err(|e| DbError::query(format!("column {}: {e}", column.name())))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Undecoded column bytes in the binary wire format.
struct RawColumn<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawColumn<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Timestamps as the Data API renders them: UTC, space separated,
/// fractional seconds only when present.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Decode one column value into JSON. Types without a JSON mapping are an
/// error; cast them to text in SQL.
pub(crate) fn column_to_json(ty: &Type, raw: Option<&[u8]>) -> Result<Value, BoxError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let value = match *ty {
        Type::BOOL => Value::from(bool::from_sql(ty, raw)?),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID => Value::from(u32::from_sql(ty, raw)?),
        Type::FLOAT4 => Value::from(f64::from(f32::from_sql(ty, raw)?)),
        Type::FLOAT8 => Value::from(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::String(numeric_to_string(raw)?),
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMP => Value::String(
            DateTime::from_sql(ty, raw)?
                .strftime(DATETIME_FORMAT)
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::String(
            Timestamp::from_sql(ty, raw)?
                .strftime(DATETIME_FORMAT)
                .to_string(),
        ),
        Type::DATE => Value::String(Date::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::String(Time::from_sql(ty, raw)?.strftime(TIME_FORMAT).to_string()),
        Type::BYTEA => Value::String(BASE64.encode(<&[u8]>::from_sql(ty, raw)?)),
        Type::VOID => Value::Null,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(String::from_sql(ty, raw)?)
        }
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            Vec::<Option<String>>::from_sql(ty, raw)?
                .into_iter()
                .map(Value::from)
                .collect()
        }
        Type::BOOL_ARRAY => Vec::<Option<bool>>::from_sql(ty, raw)?
            .into_iter()
            .map(Value::from)
            .collect(),
        Type::INT4_ARRAY => Vec::<Option<i32>>::from_sql(ty, raw)?
            .into_iter()
            .map(Value::from)
            .collect(),
        Type::INT8_ARRAY => Vec::<Option<i64>>::from_sql(ty, raw)?
            .into_iter()
            .map(Value::from)
            .collect(),
        _ => return Err(format!("no JSON mapping for type {ty}; cast it to text in SQL").into()),
    };
    Ok(value)
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary `numeric` (base-10000 digit groups) in decimal notation.
pub(crate) fn numeric_to_string(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<i16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };
    let ndigits = usize::try_from(word(0)?)?;
    let weight = i32::from(word(1)?);
    let sign = word(2)? as u16;
    let dscale = usize::try_from(word(3)?)?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let group = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for idx in 1..=weight {
            out.push_str(&format!("{:04}", group(idx)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// A bound value adapting itself to the parameter type the server inferred.
#[derive(Debug)]
pub(crate) struct PgParam(pub(crate) SqlValue);

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => text_param(ty, &b.to_string(), out),
            },
            SqlValue::Int(i) => int_param(*i, ty, out),
            SqlValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                _ => text_param(ty, &f.to_string(), out),
            },
            SqlValue::Text(s) => text_param(ty, s, out),
            SqlValue::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ => text_param(ty, &v.to_string(), out),
            },
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_param(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::JSON | Type::JSONB => Value::from(i).to_sql(ty, out),
        _ => text_param(ty, &i.to_string(), out),
    }
}

fn text_param(ty: &Type, s: &str, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => s.parse::<bool>()?.to_sql(ty, out),
        Type::INT2 => s.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => s.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => s.parse::<f64>()?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<Value>(s)
            .unwrap_or_else(|_| Value::String(s.to_string()))
            .to_sql(ty, out),
        Type::UUID => s.parse::<uuid::Uuid>()?.to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            s.to_sql(ty, out)
        }
        _ => Err(format!("cannot bind text to a parameter of type {ty}; cast it in SQL").into()),
    }
}
