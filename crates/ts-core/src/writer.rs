//! Batch writer: one multi-row INSERT per batch.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use ts_common::LogLine;
use ts_model::{ModelDefinition, ModelRegistry};

use crate::batch::Batch;
use crate::store::{InsertStatement, SqlValue, Store, StoreError};

/// MySQL's limit on placeholders in one prepared statement.
pub const MAX_PLACEHOLDERS: usize = 65_535;

/// Errors from building or executing an insert.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("batch has no records")]
    Empty,

    #[error("insert needs {count} placeholders, limit is {MAX_PLACEHOLDERS}")]
    TooManyPlaceholders { count: usize },

    #[error("record {index} has {actual} values, model {model} declares {expected}")]
    FieldCount {
        model: String,
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WriteError> for ts_common::Error {
    fn from(err: WriteError) -> Self {
        ts_common::Error::Store(err.to_string())
    }
}

/// Build the multi-row insert for `records` into `table`.
///
/// Every row binds `version, logtime, now, now` followed by the declared
/// values, matching [`ModelDefinition::field_list_sql`].
pub fn build_insert(
    model: &ModelDefinition,
    table: &str,
    records: &[LogLine],
    now: i64,
) -> Result<InsertStatement, WriteError> {
    if records.is_empty() {
        return Err(WriteError::Empty);
    }
    let width = model.fields().len();
    let count = width * records.len();
    if count > MAX_PLACEHOLDERS {
        return Err(WriteError::TooManyPlaceholders { count });
    }

    let expected = model.declared_field_count();
    let row = format!("({})", vec!["?"; width].join(","));
    let mut args = Vec::with_capacity(count);
    for (index, record) in records.iter().enumerate() {
        if record.values.len() != expected {
            return Err(WriteError::FieldCount {
                model: model.versioned_name().to_string(),
                index,
                expected,
                actual: record.values.len(),
            });
        }
        args.push(SqlValue::Int(i64::from(record.version)));
        args.push(SqlValue::Int(record.logtime));
        args.push(SqlValue::Int(now));
        args.push(SqlValue::Int(now));
        args.extend(record.values.iter().cloned().map(SqlValue::Text));
    }

    let sql = format!(
        "INSERT INTO `{}` {} VALUES {}",
        table,
        model.field_list_sql(),
        vec![row.as_str(); records.len()].join(",")
    );
    Ok(InsertStatement {
        table: table.to_string(),
        sql,
        args,
        rows: records.len(),
    })
}

/// Check that a full batch of `rows` records of the widest model still fits
/// in one statement.
pub fn check_batch_capacity(registry: &ModelRegistry, rows: usize) -> Result<(), WriteError> {
    let widest = registry.models().iter().map(|m| m.fields().len()).max().unwrap_or(0);
    let count = widest * rows.max(1);
    if count > MAX_PLACEHOLDERS {
        return Err(WriteError::TooManyPlaceholders { count });
    }
    Ok(())
}

/// Writes batches to the store.
pub struct BatchWriter<S: Store> {
    store: Arc<S>,
    log_statements: bool,
}

impl<S: Store> BatchWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            log_statements: false,
        }
    }

    /// Log every insert statement at debug level.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Insert every record of `batch` in one statement.
    pub async fn insert(&self, batch: &Batch) -> Result<u64, WriteError> {
        let table = batch.table_name();
        let now = chrono::Utc::now().timestamp();
        let statement = build_insert(&batch.model, &table, &batch.records, now)?;
        if self.log_statements {
            debug!(table = %table, rows = statement.rows, sql = %statement.sql, "insert");
        }
        match self.store.insert(&statement).await {
            Ok(affected) => Ok(affected),
            Err(e) => {
                warn!(table = %table, rows = statement.rows, error = %e, "insert failed");
                Err(e.into())
            }
        }
    }
}
