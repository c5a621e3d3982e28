//! Schema migration: reconcile live tables against the latest models.
//!
//! Only additive changes run automatically: missing tables, missing
//! columns, missing indexes. Dropping columns that a model no longer
//! declares is a separate, explicit operation. Every DDL statement is its
//! own unit of work; a failure is recorded in the [`MigrationReport`] and
//! the pass moves on.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use ts_common::MonthKey;
use ts_config::TlogSettings;
use ts_model::{drop_column_sql, ModelDefinition, ModelRegistry};

use crate::store::{Store, StoreError, TableSnapshot};

/// Which additive steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub create_tables: bool,
    pub add_columns: bool,
    pub add_indexes: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            create_tables: true,
            add_columns: true,
            add_indexes: true,
        }
    }
}

impl MigrationOptions {
    pub fn from_settings(tlog: &TlogSettings) -> Self {
        Self {
            create_tables: tlog.auto_create_table,
            add_columns: tlog.auto_add_column,
            add_indexes: tlog.auto_add_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlKind {
    CreateTable,
    AddColumn,
    AddIndex,
    DropColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Applied,
    Failed(String),
    /// Computed but not executed (dry run).
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementOutcome {
    pub table: String,
    pub kind: DdlKind,
    pub sql: String,
    pub status: StatementStatus,
}

/// A table that could not be inspected or does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Per-statement outcomes of one migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub months: Vec<MonthKey>,
    pub tables_checked: usize,
    pub statements: Vec<StatementOutcome>,
    pub skipped: Vec<SkippedTable>,
}

impl MigrationReport {
    pub fn applied(&self) -> usize {
        self.count(|s| matches!(s, StatementStatus::Applied))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, StatementStatus::Failed(_)))
    }

    pub fn planned(&self) -> usize {
        self.count(|s| matches!(s, StatementStatus::Planned))
    }

    fn count(&self, pred: impl Fn(&StatementStatus) -> bool) -> usize {
        self.statements.iter().filter(|s| pred(&s.status)).count()
    }

    /// Statements of `kind`, in execution order.
    pub fn of_kind(&self, kind: DdlKind) -> impl Iterator<Item = &StatementOutcome> {
        self.statements.iter().filter(move |s| s.kind == kind)
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.skipped.is_empty()
    }

    pub fn log_summary(&self) {
        info!(
            months = ?self.months.iter().map(|m| m.as_u32()).collect::<Vec<_>>(),
            tables = self.tables_checked,
            applied = self.applied(),
            failed = self.failed(),
            planned = self.planned(),
            skipped = self.skipped.len(),
            "migration pass complete"
        );
    }

    fn record(&mut self, table: &str, kind: DdlKind, sql: String, status: StatementStatus) {
        self.statements.push(StatementOutcome {
            table: table.to_string(),
            kind,
            sql,
            status,
        });
    }

    fn skip(&mut self, table: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(table, reason = %reason, "skipping table");
        self.skipped.push(SkippedTable {
            table: table.to_string(),
            reason,
        });
    }
}

/// ADD COLUMN statements for every model field missing from `snapshot`,
/// in field order.
pub fn plan_missing_columns(model: &ModelDefinition, snapshot: &TableSnapshot) -> Vec<String> {
    model
        .fields()
        .iter()
        .filter(|f| !snapshot.has_column(&f.name))
        .map(|f| f.add_column_sql(&snapshot.table))
        .collect()
}

/// ADD INDEX statements for every indexed field whose `i_<field>` index is
/// missing from `snapshot`.
pub fn plan_missing_indexes(model: &ModelDefinition, snapshot: &TableSnapshot) -> Vec<String> {
    model
        .fields()
        .iter()
        .filter(|f| f.indexed && !snapshot.has_index(&f.index_name()))
        .map(|f| f.add_index_sql(&snapshot.table))
        .collect()
}

/// Live columns the model no longer declares. Never includes `id` or the
/// audit fields.
pub fn plan_obsolete_columns(model: &ModelDefinition, snapshot: &TableSnapshot) -> Vec<String> {
    snapshot
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| *name != "id" && model.field(name).is_none())
        .map(str::to_string)
        .collect()
}

/// Applies migrations through a [`Store`].
pub struct Migrator<S: Store> {
    store: Arc<S>,
    registry: Arc<ModelRegistry>,
    options: MigrationOptions,
}

impl<S: Store> Clone for Migrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            options: self.options,
        }
    }
}

impl<S: Store> Migrator<S> {
    pub fn new(store: Arc<S>, registry: Arc<ModelRegistry>, options: MigrationOptions) -> Self {
        Self {
            store,
            registry,
            options,
        }
    }

    pub fn options(&self) -> MigrationOptions {
        self.options
    }

    /// Migrate `month` and the month after it. A table shared by both
    /// months (unsharded models) is handled once.
    pub async fn run_cycle(&self, month: MonthKey) -> MigrationReport {
        let months = [month, month.next()];
        info!(months = ?months.map(|m| m.as_u32()), "migration pass");

        let mut report = MigrationReport {
            months: months.to_vec(),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        for month in months {
            for model in self.registry.latest() {
                let table = model.table_name(month);
                if seen.insert(table.clone()) {
                    self.migrate_table(model, &table, &mut report).await;
                }
            }
        }
        report
    }

    async fn migrate_table(&self, model: &ModelDefinition, table: &str, report: &mut MigrationReport) {
        report.tables_checked += 1;

        if self.options.create_tables {
            match self.create_missing_table(model, table, report).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    report.skip(table, format!("existence probe failed: {}", e));
                    return;
                }
            }
        }

        if !self.options.add_columns && !self.options.add_indexes {
            return;
        }
        let snapshot = match self.snapshot(table).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.skip(table, format!("introspection failed: {}", e));
                return;
            }
        };
        if snapshot.columns.is_empty() {
            report.skip(table, "table does not exist");
            return;
        }

        if self.options.add_columns {
            self.add_missing_columns(model, &snapshot, report).await;
        }
        if self.options.add_indexes {
            self.add_missing_indexes(model, &snapshot, report).await;
        }
    }

    /// Create `table` with its indexes if it does not exist. Returns whether
    /// a CREATE TABLE was attempted. If it fails, the index statements are
    /// not attempted.
    pub async fn create_missing_table(
        &self,
        model: &ModelDefinition,
        table: &str,
        report: &mut MigrationReport,
    ) -> Result<bool, StoreError> {
        if self.store.table_exists(table).await? {
            return Ok(false);
        }
        let created = self
            .apply(report, table, DdlKind::CreateTable, model.create_table_sql(table))
            .await;
        if created {
            for sql in model.add_index_sqls(table) {
                self.apply(report, table, DdlKind::AddIndex, sql).await;
            }
        }
        Ok(true)
    }

    pub async fn add_missing_columns(
        &self,
        model: &ModelDefinition,
        snapshot: &TableSnapshot,
        report: &mut MigrationReport,
    ) {
        for sql in plan_missing_columns(model, snapshot) {
            self.apply(report, &snapshot.table, DdlKind::AddColumn, sql).await;
        }
    }

    pub async fn add_missing_indexes(
        &self,
        model: &ModelDefinition,
        snapshot: &TableSnapshot,
        report: &mut MigrationReport,
    ) {
        for sql in plan_missing_indexes(model, snapshot) {
            self.apply(report, &snapshot.table, DdlKind::AddIndex, sql).await;
        }
    }

    /// Drop live columns that the latest model no longer declares, for the
    /// tables of `month`. With `apply == false` the statements are only
    /// planned.
    pub async fn drop_obsolete_columns(&self, month: MonthKey, apply: bool) -> MigrationReport {
        let mut report = MigrationReport {
            months: vec![month],
            ..Default::default()
        };
        let mut seen = HashSet::new();
        for model in self.registry.latest() {
            let table = model.table_name(month);
            if !seen.insert(table.clone()) {
                continue;
            }
            report.tables_checked += 1;
            let snapshot = match self.snapshot(&table).await {
                Ok(snapshot) if snapshot.columns.is_empty() => {
                    report.skip(&table, "table does not exist");
                    continue;
                }
                Ok(snapshot) => snapshot,
                Err(e) => {
                    report.skip(&table, format!("introspection failed: {}", e));
                    continue;
                }
            };
            for column in plan_obsolete_columns(model, &snapshot) {
                let sql = drop_column_sql(&table, &column);
                if apply {
                    self.apply(&mut report, &table, DdlKind::DropColumn, sql).await;
                } else {
                    info!(table = %table, column = %column, "would drop column");
                    report.record(&table, DdlKind::DropColumn, sql, StatementStatus::Planned);
                }
            }
        }
        report
    }

    /// Live columns and indexes of `table`.
    pub async fn snapshot(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        let columns = self.store.columns(table).await?;
        let indexes = self.store.index_names(table).await?;
        Ok(TableSnapshot::new(table, columns, indexes))
    }

    async fn apply(&self, report: &mut MigrationReport, table: &str, kind: DdlKind, sql: String) -> bool {
        match self.store.execute(&sql).await {
            Ok(()) => {
                info!(table, kind = ?kind, "ddl applied");
                debug!(sql = %sql, "ddl");
                report.record(table, kind, sql, StatementStatus::Applied);
                true
            }
            Err(e) => {
                warn!(table, kind = ?kind, sql = %sql, error = %e, "ddl failed");
                report.record(table, kind, sql, StatementStatus::Failed(e.to_string()));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnInfo, MemoryStore};

    const MODELS: &str = r#"
        <tlogs>
            <tlog name="stat" version="1" comment="stats">
                <field name="value" type="varchar(32)" comment="value" index="true" />
            </tlog>
        </tlogs>
    "#;

    fn stat_model() -> Arc<ModelDefinition> {
        let registry = ModelRegistry::from_xml_str(MODELS).unwrap();
        Arc::clone(registry.latest_by_name("stat").unwrap())
    }

    fn snapshot(columns: &[&str], indexes: &[&str]) -> TableSnapshot {
        TableSnapshot::new(
            "stat",
            columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.to_string(),
                    column_type: "int".into(),
                })
                .collect(),
            indexes.iter().map(|i| i.to_string()).collect(),
        )
    }

    #[test]
    fn complete_snapshot_plans_nothing() {
        let model = stat_model();
        let full = snapshot(
            &["id", "version", "logtime", "createtime", "updatetime", "value"],
            &["PRIMARY", "i_logtime", "i_value"],
        );
        assert!(plan_missing_columns(&model, &full).is_empty());
        assert!(plan_missing_indexes(&model, &full).is_empty());
        assert!(plan_obsolete_columns(&model, &full).is_empty());
    }

    #[test]
    fn plans_missing_and_obsolete() {
        let model = stat_model();
        let partial = snapshot(&["id", "version", "logtime", "legacy"], &["PRIMARY"]);
        assert_eq!(
            plan_missing_columns(&model, &partial),
            vec![
                "ALTER TABLE `stat` ADD COLUMN `createtime` int NOT NULL DEFAULT '0' COMMENT 'create time'"
                    .to_string(),
                "ALTER TABLE `stat` ADD COLUMN `updatetime` int NOT NULL DEFAULT '0' COMMENT 'update time'"
                    .to_string(),
                "ALTER TABLE `stat` ADD COLUMN `value` varchar(32) NOT NULL DEFAULT '' COMMENT 'value'"
                    .to_string(),
            ]
        );
        assert_eq!(
            plan_missing_indexes(&model, &partial),
            vec![
                "ALTER TABLE `stat` ADD INDEX `i_logtime`(`logtime`)".to_string(),
                "ALTER TABLE `stat` ADD INDEX `i_value`(`value`)".to_string(),
            ]
        );
        assert_eq!(plan_obsolete_columns(&model, &partial), vec!["legacy".to_string()]);
    }

    #[tokio::test]
    async fn unsharded_table_migrated_once_per_cycle() {
        let registry = Arc::new(ModelRegistry::from_xml_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new());
        let migrator = Migrator::new(Arc::clone(&store), registry, MigrationOptions::default());

        let report = migrator.run_cycle(MonthKey::new(2023, 12).unwrap()).await;
        assert_eq!(report.tables_checked, 1);
        assert_eq!(report.of_kind(DdlKind::CreateTable).count(), 1);
        assert_eq!(report.of_kind(DdlKind::AddIndex).count(), 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn dry_run_prune_plans_without_executing() {
        let registry = Arc::new(ModelRegistry::from_xml_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new().with_table(
            "stat",
            &["id", "version", "logtime", "createtime", "updatetime", "value", "legacy"],
            &["PRIMARY"],
        ));
        let migrator = Migrator::new(Arc::clone(&store), registry, MigrationOptions::default());
        let month = MonthKey::new(2024, 1).unwrap();

        let plan = migrator.drop_obsolete_columns(month, false).await;
        assert_eq!(plan.planned(), 1);
        assert!(store.executed().is_empty());

        let applied = migrator.drop_obsolete_columns(month, true).await;
        assert_eq!(applied.applied(), 1);
        assert!(!store.table("stat").unwrap().columns.contains(&"legacy".to_string()));
    }
}
