//! PostgreSQL-backed [`reportflow::collaborators::DataSourceConnector`].
//!
//! Schema introspection and row decoding follow the teacher's
//! `information_schema` queries and per-type JSON coercion; this crate adds
//! positional parameter binding and a query wall-clock timeout, neither of
//! which the teacher's fixed-prompt tool needed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reportflow::collaborators::{ColumnInfo, ColumnMeta, ConnectorError, DataSourceConnector, QueryResult};
use sqlx::{Column, PgPool, Row, TypeInfo};
use tracing::debug;

mod pg_repositories;
pub use pg_repositories::{PgArtifactRepository, PgExecutionRepository};

/// A data source backed by a Postgres connection pool.
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    /// Connect using a `postgres://` connection string.
    pub async fn connect(database_uri: &str) -> Result<Self, ConnectorError> {
        let pool = PgPool::connect(database_uri)
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an already-constructed pool, e.g. one shared with other consumers.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(e: sqlx::Error) -> ConnectorError {
    match &e {
        sqlx::Error::PoolTimedOut => ConnectorError::Timeout,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("42") {
                ConnectorError::Syntax(db_err.message().to_string())
            } else if code == "28P01" || code == "42501" {
                ConnectorError::PermissionDenied(db_err.message().to_string())
            } else {
                ConnectorError::Connection(db_err.message().to_string())
            }
        }
        _ => ConnectorError::Connection(e.to_string()),
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        serde_json::Value::String(s) => query.bind(s.as_str()),
        serde_json::Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        serde_json::Value::Number(n) if n.is_u64() => query.bind(n.as_u64().map(|v| v as i64)),
        serde_json::Value::Number(n) => query.bind(n.as_f64()),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Null => query.bind(Option::<String>::None),
        other => query.bind(other.to_string()),
    }
}

fn column_to_json(row: &sqlx::postgres::PgRow, index: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value as Json;
    match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<String, _>(index)
            .map(Json::String)
            .unwrap_or(Json::Null),
        "INT2" | "INT4" | "SERIAL" => row
            .try_get::<i32, _>(index)
            .map(|v| Json::Number(v.into()))
            .unwrap_or(Json::Null),
        "INT8" | "BIGSERIAL" => row
            .try_get::<i64, _>(index)
            .map(|v| Json::Number(v.into()))
            .unwrap_or(Json::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        "BOOL" => row.try_get::<bool, _>(index).map(Json::Bool).unwrap_or(Json::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| Json::String(v.and_utc().to_rfc3339()))
            .unwrap_or(Json::Null),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| Json::String(v.to_rfc3339()))
            .unwrap_or(Json::Null),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| Json::String(v.to_string()))
            .unwrap_or(Json::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Json::String)
            .unwrap_or(Json::Null),
    }
}

#[async_trait::async_trait]
impl DataSourceConnector for PgConnector {
    async fn list_tables(&self) -> Result<Vec<String>, ConnectorError> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect())
    }

    async fn get_columns(
        &self,
        tables: &[String],
    ) -> Result<HashMap<String, Vec<ColumnMeta>>, ConnectorError> {
        let mut result = HashMap::new();
        for table in tables {
            let rows = sqlx::query(
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let columns = rows
                .into_iter()
                .map(|row| ColumnMeta {
                    column: row.try_get::<String, _>(0).unwrap_or_default(),
                    type_name: row.try_get::<String, _>(1).unwrap_or_default(),
                    nullable: row.try_get::<String, _>(2).map(|v| v == "YES").unwrap_or(true),
                    comment: None,
                })
                .collect();
            result.insert(table.clone(), columns);
        }
        Ok(result)
    }

    async fn execute(
        &self,
        sql: &str,
        parameters: &[serde_json::Value],
        timeout: Duration,
    ) -> Result<QueryResult, ConnectorError> {
        let started = Instant::now();

        let mut query = sqlx::query(sql);
        for param in parameters {
            query = bind_param(query, param);
        }

        let rows = tokio::time::timeout(timeout, query.fetch_all(&self.pool))
            .await
            .map_err(|_| ConnectorError::Timeout)?
            .map_err(map_sqlx_error)?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| ColumnInfo {
                        name: c.name().to_string(),
                        type_name: c.type_info().name().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let json_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (i, col) in row.columns().iter().enumerate() {
                    obj.insert(col.name().to_string(), column_to_json(row, i, col.type_info().name()));
                }
                serde_json::Value::Object(obj)
            })
            .collect();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(sql, row_count = json_rows.len(), elapsed_ms, "executed query");

        Ok(QueryResult {
            row_count: json_rows.len(),
            rows: json_rows,
            columns,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_sqlx_pool_timeout_is_connector_timeout() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ConnectorError::Timeout));
    }
}
