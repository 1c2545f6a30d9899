//! PostgreSQL Association Store
//!
//! Implements `AssociationStore` on top of a sqlx `PgPool`. Statements come
//! from `crate::sql`; values are bound positionally.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row as SqlxRow, TypeInfo};
use tracing::debug;

use super::core::{AssociationStore, DatabasePoolConfig, DatabaseValue, InFilter, Row, StoreTransaction};
use crate::error::{PivotError, PivotResult};
use crate::sql;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// `AssociationStore` backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pool for `database_url` and wrap it
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> PivotResult<Self> {
        validate_database_url(database_url)?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| PivotError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::from_pool(pool))
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Check that a URL names a PostgreSQL database
pub fn validate_database_url(url: &str) -> PivotResult<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| PivotError::Connection(format!("Invalid database URL: {}", e)))?;

    if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
        return Err(PivotError::Connection("Invalid PostgreSQL URL scheme".to_string()));
    }

    if parsed.host_str().is_none() {
        return Err(PivotError::Connection("Missing host in database URL".to_string()));
    }

    if parsed.path().trim_start_matches('/').is_empty() {
        return Err(PivotError::Connection("Missing database name in URL".to_string()));
    }

    Ok(())
}

#[async_trait]
impl AssociationStore for PostgresStore {
    async fn query_rows(&self, table: &str, columns: &[&str], where_equals: &Row) -> PivotResult<Vec<Row>> {
        let equals: Vec<&str> = where_equals.keys().map(String::as_str).collect();
        let statement = sql::select_statement(table, columns, &equals);
        debug!("{}", statement);

        let mut query = sqlx::query(&statement);
        for value in where_equals.values() {
            query = bind_database_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_row).collect()
    }

    async fn insert_row(&self, table: &str, values: &Row) -> PivotResult<()> {
        let (statement, params) = insert_parts(table, values);
        debug!("{}", statement);

        let mut query = sqlx::query(&statement);
        for value in params {
            query = bind_database_value(query, value);
        }

        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_rows(&self, table: &str, where_equals: &Row, where_in: InFilter<'_>) -> PivotResult<u64> {
        if where_in.values.is_empty() {
            return Ok(0);
        }

        let equals: Vec<&str> = where_equals.keys().map(String::as_str).collect();
        let statement = sql::delete_statement(table, &equals, where_in.column, where_in.values.len());
        debug!("{}", statement);

        let mut query = sqlx::query(&statement);
        for value in where_equals.values().chain(where_in.values.iter()) {
            query = bind_database_value(query, value);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn begin_transaction(&self) -> PivotResult<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PivotError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_row(&mut self, table: &str, values: &Row) -> PivotResult<()> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| PivotError::Transaction("Transaction already completed".to_string()))?;

        let (statement, params) = insert_parts(table, values);
        debug!("{}", statement);

        let mut query = sqlx::query(&statement);
        for value in params {
            query = bind_database_value(query, value);
        }

        query.execute(&mut **tx).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> PivotResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| PivotError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PivotError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> PivotResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| PivotError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| PivotError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

fn insert_parts<'a>(table: &str, values: &'a Row) -> (String, impl Iterator<Item = &'a DatabaseValue>) {
    let columns: Vec<&str> = values.keys().map(String::as_str).collect();
    (sql::insert_statement(table, &columns), values.values())
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
    }
}

fn pg_row_to_row(row: &PgRow) -> PivotResult<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| Ok((column.name().to_string(), pg_value(row, index)?)))
        .collect()
}

/// Convert a PostgreSQL column value to DatabaseValue
///
/// Only the types a scalar key column can have are decoded.
fn pg_value(row: &PgRow, index: usize) -> PivotResult<DatabaseValue> {
    let type_name = row.columns()[index].type_info().name().to_string();

    let value = match type_name.as_str() {
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| DatabaseValue::Int32(v as i32)),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(DatabaseValue::Int32),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(DatabaseValue::Int64),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(index)?.map(DatabaseValue::Uuid),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(DatabaseValue::String)
        }
        other => {
            return Err(PivotError::InvalidKey(format!(
                "Column type '{}' is not supported for relation keys",
                other
            )))
        }
    };

    Ok(value.unwrap_or(DatabaseValue::Null))
}
