//! Core Storage Traits
//!
//! The reconciliation engine never talks to a driver directly. It consumes the
//! narrow contract below: query rows by equality, insert a row, delete rows by
//! equality plus an `IN` list, and run inserts inside a transaction.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::PivotResult;

/// A single association row: column name to value
pub type Row = BTreeMap<String, DatabaseValue>;

/// `column IN (values...)` restriction used by batch deletes
#[derive(Debug, Clone, Copy)]
pub struct InFilter<'a> {
    pub column: &'a str,
    pub values: &'a [DatabaseValue],
}

impl<'a> InFilter<'a> {
    pub fn new(column: &'a str, values: &'a [DatabaseValue]) -> Self {
        Self { column, values }
    }

    /// Check whether a row value is part of the list
    pub fn matches(&self, value: Option<&DatabaseValue>) -> bool {
        value.map_or(false, |v| self.values.iter().any(|candidate| candidate.same_key(v)))
    }
}

/// Storage collaborator for association tables
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Fetch the given columns of every row whose columns equal `where_equals`
    async fn query_rows(&self, table: &str, columns: &[&str], where_equals: &Row) -> PivotResult<Vec<Row>>;

    /// Insert one row outside of any transaction
    async fn insert_row(&self, table: &str, values: &Row) -> PivotResult<()>;

    /// Delete every row matching `where_equals` and the `IN` filter, returning the count
    async fn delete_rows(&self, table: &str, where_equals: &Row, where_in: InFilter<'_>) -> PivotResult<u64>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> PivotResult<Box<dyn StoreTransaction>>;
}

/// Transaction handle returned by `AssociationStore::begin_transaction`
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert one row within the transaction
    async fn insert_row(&mut self, table: &str, values: &Row) -> PivotResult<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> PivotResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> PivotResult<()>;
}

/// Value of a scalar key column, as bound to or read from the association table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseValue {
    Null,
    Int32(i32),
    Int64(i64),
    String(String),
    Uuid(uuid::Uuid),
}

impl DatabaseValue {
    /// Key equality: integers compare by value regardless of width
    pub fn same_key(&self, other: &DatabaseValue) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// Build a row from `(column, value)` pairs
pub fn row<I, C, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (C, V)>,
    C: Into<String>,
    V: Into<DatabaseValue>,
{
    pairs
        .into_iter()
        .map(|(column, value)| (column.into(), value.into()))
        .collect()
}
