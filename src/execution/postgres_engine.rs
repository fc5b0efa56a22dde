//! Postgres query service
//!
//! Runs validated statements over a sqlx pool and decodes rows into typed
//! cells.

use crate::db::connection::init_pool;
use crate::error::{Result, SearchError};
use crate::execution::engine::QueryService;
use crate::execution::result::{CellValue, QueryResult};
use crate::schema_scope::{ColumnDescription, SchemaScope, TableDescription};
use crate::scope_guard::ValidatedStatement;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Slack on top of the server-side statement timeout before the client gives
/// up on its own.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

pub struct PostgresQueryService {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresQueryService {
    /// Open the pool. Any failure here is a connectivity error: the session
    /// never starts.
    pub async fn connect(dsn: &str, statement_timeout: Duration) -> Result<Self> {
        let pool = init_pool(dsn, statement_timeout)
            .await
            .map_err(|e| SearchError::Connectivity(format!("cannot connect to database: {}", e)))?;
        info!("Connected to database");
        Ok(Self::from_pool(pool, statement_timeout))
    }

    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn run_capped(&self, sql: &str) -> std::result::Result<(Vec<String>, Vec<PgRow>), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let prepared = (&mut *conn).prepare(sql).await?;
        let columns = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = prepared.query().fetch_all(&mut *conn).await?;
        Ok((columns, rows))
    }
}

#[async_trait]
impl QueryService for PostgresQueryService {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: &ValidatedStatement, row_limit: usize) -> Result<QueryResult> {
        // One extra row tells us whether the cap cut anything off. The newline
        // keeps a trailing line comment from swallowing the wrapper.
        let capped = format!(
            "SELECT * FROM (\n{}\n) AS scoped_result LIMIT {}",
            statement.sql(),
            row_limit + 1
        );
        debug!("Executing: {}", capped);

        let started = Instant::now();
        let deadline = self.statement_timeout + CLIENT_TIMEOUT_GRACE;
        let (columns, rows) = tokio::time::timeout(deadline, self.run_capped(&capped))
            .await
            .map_err(|_| {
                SearchError::Execution(format!("statement timed out after {}s", deadline.as_secs()))
            })?
            .map_err(classify_sqlx_error)?;

        let truncated = rows.len() > row_limit;
        let mut decoded = Vec::with_capacity(rows.len().min(row_limit));
        for row in rows.iter().take(row_limit) {
            decoded.push(decode_row(row)?);
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Query returned {} rows in {}ms{}",
            decoded.len(),
            execution_time_ms,
            if truncated { " (truncated)" } else { "" }
        );

        Ok(QueryResult {
            columns,
            rows: decoded,
            truncated_at: truncated.then_some(row_limit),
            execution_time_ms,
        })
    }

    async fn describe_tables(&self, scope: &SchemaScope) -> Result<Vec<TableDescription>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
            FROM information_schema.columns
            WHERE table_schema::text = $1 AND table_name::text = ANY($2)
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(scope.schema())
        .bind(scope.tables().to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        let mut described = Vec::new();
        for table in scope.tables() {
            let columns: Vec<ColumnDescription> = rows
                .iter()
                .filter(|(t, _, _, _)| t == table)
                .map(|(_, name, data_type, nullable)| ColumnDescription {
                    name: name.clone(),
                    data_type: data_type.clone(),
                    nullable: nullable == "YES",
                })
                .collect();
            if columns.is_empty() {
                warn!("Scoped table {} not found in schema {}", table, scope.schema());
                continue;
            }
            described.push(TableDescription {
                name: table.clone(),
                columns,
            });
        }
        Ok(described)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

/// Split sqlx errors into per-statement failures and lost connections.
pub fn classify_sqlx_error(err: sqlx::Error) -> SearchError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            // Class 08 is connection exception; 57P01-57P03 are server shutdown.
            if code.starts_with("08") || matches!(code.as_str(), "57P01" | "57P02" | "57P03") {
                SearchError::Connectivity(db_err.message().to_string())
            } else if code == "57014" {
                SearchError::Execution("statement timed out".to_string())
            } else if code.is_empty() {
                SearchError::Execution(db_err.message().to_string())
            } else {
                SearchError::Execution(format!("{} (SQLSTATE {})", db_err.message(), code))
            }
        }
        sqlx::Error::Io(e) => SearchError::Connectivity(format!("database I/O error: {}", e)),
        sqlx::Error::Tls(e) => SearchError::Connectivity(format!("database TLS error: {}", e)),
        sqlx::Error::Protocol(msg) => SearchError::Connectivity(format!("database protocol error: {}", msg)),
        sqlx::Error::PoolTimedOut => SearchError::Connectivity("timed out waiting for a database connection".to_string()),
        sqlx::Error::PoolClosed => SearchError::Connectivity("database pool is closed".to_string()),
        sqlx::Error::WorkerCrashed => SearchError::Connectivity("database worker crashed".to_string()),
        other => SearchError::Execution(other.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<CellValue>> {
    let mut cells = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_string();
        let cell = decode_cell(row, idx, &type_name).map_err(|e| {
            SearchError::Execution(format!(
                "cannot decode column {} ({}): {}",
                column.name(),
                type_name,
                e
            ))
        })?;
        cells.push(cell);
    }
    Ok(cells)
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> std::result::Result<CellValue, sqlx::Error> {
    fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> CellValue) -> CellValue {
        value.map(f).unwrap_or(CellValue::Null)
    }

    let cell = match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)?, CellValue::Bool),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx)?, |v| CellValue::Int(v.into())),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx)?, |v| CellValue::Int(v.into())),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx)?, CellValue::Int),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx)?, |v| CellValue::Float(v.into())),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx)?, CellValue::Float),
        "NUMERIC" => opt(row.try_get::<Option<sqlx::types::Decimal>, _>(idx)?, |v| {
            CellValue::Decimal(v.to_string())
        }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            opt(row.try_get::<Option<String>, _>(idx)?, CellValue::Text)
        }
        "TIMESTAMP" => opt(row.try_get::<Option<NaiveDateTime>, _>(idx)?, CellValue::Timestamp),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<DateTime<Utc>>, _>(idx)?, CellValue::TimestampTz),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(idx)?, CellValue::Date),
        "TIME" => opt(row.try_get::<Option<NaiveTime>, _>(idx)?, CellValue::Time),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(idx)?, CellValue::Uuid),
        "JSON" | "JSONB" => opt(row.try_get::<Option<serde_json::Value>, _>(idx)?, CellValue::Json),
        "BYTEA" => opt(row.try_get::<Option<Vec<u8>>, _>(idx)?, CellValue::Bytes),
        "TEXT[]" | "VARCHAR[]" => opt(row.try_get::<Option<Vec<String>>, _>(idx)?, CellValue::TextArray),
        other => {
            // Still distinguish NULL from an undecodable value.
            let raw = row.try_get_raw(idx)?;
            if sqlx::ValueRef::is_null(&raw) {
                CellValue::Null
            } else {
                CellValue::Unsupported(other.to_lowercase())
            }
        }
    };
    Ok(cell)
}
