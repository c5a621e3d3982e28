//! In-memory [`Store`] for tests.
//!
//! Records every DDL statement and insert, and applies the DDL shapes the
//! migrator emits (CREATE TABLE, ADD/DROP COLUMN, ADD INDEX) to a table map
//! so that repeated migration passes can be checked for idempotency.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ColumnInfo, InsertStatement, Store, StoreError};

type InsertHook = Arc<dyn Fn(&InsertStatement) + Send + Sync>;

/// One table known to the memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub indexes: BTreeSet<String>,
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    executed: Vec<String>,
    inserts: Vec<InsertStatement>,
    fail_inserts: bool,
    fail_ddl: Vec<String>,
    insert_hook: Option<InsertHook>,
}

/// Recording store backed by a table map.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a table with columns and index names.
    pub fn with_table(self, name: &str, columns: &[&str], indexes: &[&str]) -> Self {
        self.lock().tables.insert(
            name.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                indexes: indexes.iter().map(|i| i.to_string()).collect(),
            },
        );
        self
    }

    /// Make every insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    /// Make DDL statements containing `needle` fail.
    pub fn fail_ddl_containing(&self, needle: &str) {
        self.lock().fail_ddl.push(needle.to_string());
    }

    /// Run `hook` for every insert, before it is recorded.
    pub fn on_insert(&self, hook: impl Fn(&InsertStatement) + Send + Sync + 'static) {
        self.lock().insert_hook = Some(Arc::new(hook));
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    /// Every DDL statement received, successful or not.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Every successful insert.
    pub fn inserts(&self) -> Vec<InsertStatement> {
        self.lock().inserts.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.executed.clear();
        state.inserts.clear();
    }
}

/// Identifiers quoted with backticks, in order of appearance.
fn backticked(sql: &str) -> Vec<&str> {
    sql.split('`').skip(1).step_by(2).collect()
}

fn apply_ddl(tables: &mut BTreeMap<String, MemoryTable>, sql: &str) -> Result<(), StoreError> {
    let idents = backticked(sql);
    let table_name = idents
        .first()
        .ok_or_else(|| StoreError::Rejected(format!("no table in {:?}", sql)))?
        .to_string();

    if sql.starts_with("CREATE TABLE") {
        if tables.contains_key(&table_name) {
            return Err(StoreError::Rejected(format!("table {} exists", table_name)));
        }
        let columns = sql
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|l| l.starts_with('`'))
            .filter_map(|l| backticked(l).first().map(|c| c.to_string()))
            .collect();
        let table = MemoryTable {
            columns,
            indexes: BTreeSet::from(["PRIMARY".to_string()]),
        };
        tables.insert(table_name, table);
        return Ok(());
    }

    let table = tables
        .get_mut(&table_name)
        .ok_or_else(|| StoreError::Rejected(format!("no such table {}", table_name)))?;
    let target = idents
        .get(1)
        .ok_or_else(|| StoreError::Rejected(format!("no target in {:?}", sql)))?
        .to_string();

    if sql.contains(" ADD COLUMN ") {
        if table.columns.contains(&target) {
            return Err(StoreError::Rejected(format!("duplicate column {}", target)));
        }
        table.columns.push(target);
    } else if sql.contains(" ADD INDEX ") {
        if !table.indexes.insert(target.clone()) {
            return Err(StoreError::Rejected(format!("duplicate index {}", target)));
        }
    } else if sql.contains(" DROP COLUMN ") {
        let before = table.columns.len();
        table.columns.retain(|c| c != &target);
        if table.columns.len() == before {
            return Err(StoreError::Rejected(format!("no column {}", target)));
        }
    } else {
        return Err(StoreError::Rejected(format!("unsupported statement {:?}", sql)));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|name| ColumnInfo {
                        name: name.clone(),
                        column_type: String::new(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn index_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.indexes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.executed.push(sql.to_string());
        if state.fail_ddl.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(StoreError::Rejected(format!("injected failure: {}", sql)));
        }
        apply_ddl(&mut state.tables, sql)
    }

    async fn insert(&self, statement: &InsertStatement) -> Result<u64, StoreError> {
        let hook = self.lock().insert_hook.clone();
        if let Some(hook) = hook {
            hook(statement);
        }
        let mut state = self.lock();
        if state.fail_inserts {
            return Err(StoreError::Rejected(format!(
                "injected insert failure on {}",
                statement.table
            )));
        }
        state.inserts.push(statement.clone());
        Ok(statement.rows as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applies_create_and_alter() {
        let store = MemoryStore::new();
        store
            .execute("CREATE TABLE `t` (\n\t`id` bigint,\n\t`a` int,\n\tPRIMARY KEY (`id`)\n);")
            .await
            .unwrap();
        store
            .execute("ALTER TABLE `t` ADD COLUMN `b` int NOT NULL DEFAULT '0' COMMENT ''")
            .await
            .unwrap();
        store.execute("ALTER TABLE `t` ADD INDEX `i_b`(`b`)").await.unwrap();

        let table = store.table("t").unwrap();
        assert_eq!(table.columns, vec!["id", "a", "b"]);
        assert!(table.indexes.contains("i_b"));
        assert!(store.execute("ALTER TABLE `t` ADD INDEX `i_b`(`b`)").await.is_err());
        assert!(store.execute("ALTER TABLE `missing` ADD COLUMN `x` int").await.is_err());
    }
}
