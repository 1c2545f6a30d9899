//! In-memory association store
//!
//! Keeps rows per table in a `DashMap`. Transactions stage their inserts and
//! only publish them on commit, so a rolled back batch leaves no trace. Faults
//! can be injected per insert to exercise failure paths without a database.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::core::{AssociationStore, DatabaseValue, InFilter, Row, StoreTransaction};
use crate::error::{PivotError, PivotResult};

type InsertFault = Arc<dyn Fn(&str, &Row) -> bool + Send + Sync>;

/// Counters describing what the store has been asked to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub queries: u64,
    pub inserts: u64,
    pub delete_statements: u64,
    pub rows_deleted: u64,
    pub transactions_begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    inserts: AtomicU64,
    delete_statements: AtomicU64,
    rows_deleted: AtomicU64,
    transactions_begun: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

#[derive(Default)]
struct Inner {
    tables: DashMap<String, Vec<Row>>,
    counters: Counters,
    insert_fault: RwLock<Option<InsertFault>>,
    fail_deletes: AtomicBool,
}

impl Inner {
    fn check_insert(&self, table: &str, values: &Row) -> PivotResult<()> {
        self.counters.inserts.fetch_add(1, Ordering::SeqCst);

        let guard = self.insert_fault.read().unwrap_or_else(|e| e.into_inner());
        if let Some(fault) = guard.as_ref() {
            if fault(table, values) {
                return Err(PivotError::Persistence(format!(
                    "insert into '{}' rejected",
                    table
                )));
            }
        }
        Ok(())
    }

    fn publish(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.tables.entry(table.to_string()).or_default().extend(rows);
    }
}

/// In-memory implementation of `AssociationStore`
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Put rows into a table directly, bypassing counters and faults
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.inner.publish(table, rows);
    }

    /// Snapshot of every row currently in a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Number of rows currently in a table
    pub fn count(&self, table: &str) -> usize {
        self.inner.tables.get(table).map_or(0, |rows| rows.len())
    }

    /// Make every insert for which `fault` returns true fail
    pub fn fail_insert_when<F>(&self, fault: F)
    where
        F: Fn(&str, &Row) -> bool + Send + Sync + 'static,
    {
        let mut guard = self.inner.insert_fault.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(fault));
    }

    /// Make every delete statement fail (or stop failing)
    pub fn fail_deletes(&self, fail: bool) {
        self.inner.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        let mut guard = self.inner.insert_fault.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        self.inner.fail_deletes.store(false, Ordering::SeqCst);
    }

    /// Current statistics
    pub fn stats(&self) -> MemoryStoreStats {
        let c = &self.inner.counters;
        MemoryStoreStats {
            queries: c.queries.load(Ordering::SeqCst),
            inserts: c.inserts.load(Ordering::SeqCst),
            delete_statements: c.delete_statements.load(Ordering::SeqCst),
            rows_deleted: c.rows_deleted.load(Ordering::SeqCst),
            transactions_begun: c.transactions_begun.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }
}

fn matches_equals(row: &Row, where_equals: &Row) -> bool {
    where_equals.iter().all(|(column, expected)| {
        row.get(column).map_or(false, |actual| actual.same_key(expected))
    })
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn query_rows(&self, table: &str, columns: &[&str], where_equals: &Row) -> PivotResult<Vec<Row>> {
        self.inner.counters.queries.fetch_add(1, Ordering::SeqCst);

        let rows = match self.inner.tables.get(table) {
            Some(rows) => rows
                .iter()
                .filter(|row| matches_equals(row, where_equals))
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| {
                            let value = row.get(*column).cloned().unwrap_or(DatabaseValue::Null);
                            (column.to_string(), value)
                        })
                        .collect::<Row>()
                })
                .collect(),
            None => Vec::new(),
        };

        debug!("memory query on '{}' returned {} rows", table, rows.len());
        Ok(rows)
    }

    async fn insert_row(&self, table: &str, values: &Row) -> PivotResult<()> {
        self.inner.check_insert(table, values)?;
        self.inner.publish(table, std::iter::once(values.clone()));
        Ok(())
    }

    async fn delete_rows(&self, table: &str, where_equals: &Row, where_in: InFilter<'_>) -> PivotResult<u64> {
        self.inner.counters.delete_statements.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_deletes.load(Ordering::SeqCst) {
            return Err(PivotError::Persistence(format!(
                "delete from '{}' rejected",
                table
            )));
        }

        let deleted = match self.inner.tables.get_mut(table) {
            Some(mut rows) => {
                let before = rows.len();
                rows.retain(|row| {
                    !(matches_equals(row, where_equals) && where_in.matches(row.get(where_in.column)))
                });
                (before - rows.len()) as u64
            }
            None => 0,
        };

        self.inner.counters.rows_deleted.fetch_add(deleted, Ordering::SeqCst);
        Ok(deleted)
    }

    async fn begin_transaction(&self) -> PivotResult<Box<dyn StoreTransaction>> {
        self.inner.counters.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged: Vec::new(),
        }))
    }
}

/// Transaction over a `MemoryStore`; inserts stay private until commit
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    staged: Vec<(String, Row)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_row(&mut self, table: &str, values: &Row) -> PivotResult<()> {
        self.inner.check_insert(table, values)?;
        self.staged.push((table.to_string(), values.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> PivotResult<()> {
        let MemoryTransaction { inner, staged } = *self;
        debug!("memory transaction committing {} rows", staged.len());
        for (table, row) in staged {
            inner.publish(&table, std::iter::once(row));
        }
        inner.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> PivotResult<()> {
        debug!("memory transaction discarding {} staged rows", self.staged.len());
        self.inner.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::core::row;

    fn link(post: i64, tag: i64) -> Row {
        row(vec![("post_id", post), ("tag_id", tag)])
    }

    #[tokio::test]
    async fn test_query_filters_and_projects() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10), link(1, 11), link(2, 10)]);

        let rows = store
            .query_rows("post_tag", &["tag_id"], &row(vec![("post_id", 1i64)]))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.len() == 1 && r.contains_key("tag_id")));
        assert_eq!(store.stats().queries, 1);
    }

    #[tokio::test]
    async fn test_query_unknown_table_is_empty() {
        let store = MemoryStore::new();
        let rows = store.query_rows("missing", &["x"], &Row::new()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_delete_respects_owner_and_in_list() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10), link(1, 11), link(2, 10)]);

        let values = vec![DatabaseValue::Int64(10)];
        let deleted = store
            .delete_rows("post_tag", &row(vec![("post_id", 1i64)]), InFilter::new("tag_id", &values))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.count("post_tag"), 2);
        assert!(store.rows("post_tag").contains(&link(2, 10)));
    }

    #[tokio::test]
    async fn test_transaction_publishes_only_on_commit() {
        let store = MemoryStore::new();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_row("post_tag", &link(1, 10)).await.unwrap();
        assert_eq!(store.count("post_tag"), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.count("post_tag"), 1);

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_row("post_tag", &link(1, 11)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.count("post_tag"), 1);

        let stats = store.stats();
        assert_eq!(stats.transactions_begun, 2);
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 1);
    }

    #[tokio::test]
    async fn test_injected_insert_fault() {
        let store = MemoryStore::new();
        store.fail_insert_when(|_, values| values.get("tag_id") == Some(&DatabaseValue::Int64(11)));

        assert!(store.insert_row("post_tag", &link(1, 10)).await.is_ok());
        let err = store.insert_row("post_tag", &link(1, 11)).await.unwrap_err();
        assert!(err.is_persistence());

        store.clear_faults();
        assert!(store.insert_row("post_tag", &link(1, 11)).await.is_ok());
        assert_eq!(store.count("post_tag"), 2);
    }

    #[tokio::test]
    async fn test_injected_delete_fault() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10)]);
        store.fail_deletes(true);

        let values = vec![DatabaseValue::Int64(10)];
        let result = store
            .delete_rows("post_tag", &row(vec![("post_id", 1i64)]), InFilter::new("tag_id", &values))
            .await;

        assert!(matches!(result, Err(PivotError::Persistence(_))));
        assert_eq!(store.count("post_tag"), 1);
    }
}
