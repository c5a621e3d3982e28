//! Relational store boundary.
//!
//! Everything the pipeline needs from the database goes through [`Store`]:
//! schema introspection, additive DDL, and multi-row inserts. The
//! production implementation is [`MySqlStore`]; tests use the in-memory
//! store behind the `test-utils` feature.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod mysql;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// Errors from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("statement rejected: {0}")]
    Rejected(String),
}

impl From<StoreError> for ts_common::Error {
    fn from(err: StoreError) -> Self {
        ts_common::Error::Store(err.to_string())
    }
}

/// A value bound to an insert placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

/// A prepared multi-row insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub sql: String,
    pub args: Vec<SqlValue>,
    pub rows: usize,
}

/// One live column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
}

/// Live structure of one physical table, fetched for a single migration
/// pass and then discarded.
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    pub table: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
    column_names: HashSet<String>,
    indexes: HashSet<String>,
}

impl TableSnapshot {
    pub fn new(table: &str, columns: Vec<ColumnInfo>, indexes: Vec<String>) -> Self {
        let column_names = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            table: table.to_string(),
            columns,
            column_names,
            indexes: indexes.into_iter().collect(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names.contains(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }
}

/// Database operations used by migration and the batch writer.
///
/// Implementations must be safe to share across tasks; the pool is the only
/// resource every task touches.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Whether `table` exists in the current database.
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Live columns of `table`, in ordinal order. Empty when the table does
    /// not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError>;

    /// Names of the live indexes of `table`.
    async fn index_names(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Execute one DDL statement.
    async fn execute(&self, sql: &str) -> Result<(), StoreError>;

    /// Execute a multi-row insert in one round trip; returns rows affected.
    async fn insert(&self, statement: &InsertStatement) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lookups() {
        let snapshot = TableSnapshot::new(
            "kill",
            vec![ColumnInfo {
                name: "id".into(),
                column_type: "bigint".into(),
            }],
            vec!["PRIMARY".into(), "i_logtime".into()],
        );
        assert!(snapshot.has_column("id"));
        assert!(!snapshot.has_column("victim"));
        assert!(snapshot.has_index("i_logtime"));
        assert!(!snapshot.has_index("i_victim"));
    }

    #[test]
    fn store_error_maps_to_common() {
        let err: ts_common::Error = StoreError::Rejected("nope".into()).into();
        assert_eq!(err.code(), 30);
    }
}
