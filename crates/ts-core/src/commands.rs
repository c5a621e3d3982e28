//! Command implementations behind the CLI.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::signal;
use tracing::{debug, info};
use ts_common::MonthKey;
use ts_config::{resolve_config_path, Settings};
use ts_model::ModelRegistry;

use crate::migrate::{MigrationOptions, MigrationReport, Migrator};
use crate::pipeline::{DrainReport, Pipeline, PipelineOptions};
use crate::store::MySqlStore;

/// Resolve, read and validate the configuration file.
pub fn load_settings(explicit: Option<&Path>) -> ts_common::Result<(PathBuf, Settings)> {
    let config_err = |e: ts_config::ConfigError| ts_common::Error::Config(e.to_string());
    let path = resolve_config_path(explicit).map_err(config_err)?;
    let settings = Settings::from_file(&path).map_err(config_err)?;
    Ok((path, settings))
}

pub fn load_registry(settings: &Settings) -> ts_common::Result<Arc<ModelRegistry>> {
    let path = &settings.tlog.model_file;
    let registry = ModelRegistry::load(path)?;
    info!(path = %path.display(), models = registry.len(), "model description loaded");
    Ok(Arc::new(registry))
}

/// DDL for every latest model, for the tables of `month`.
pub fn render_ddl(registry: &ModelRegistry, month: MonthKey) -> String {
    let mut out = String::new();
    for model in registry.latest() {
        let table = model.table_name(month);
        let _ = writeln!(out, "-- {} ({})", model.versioned_name(), table);
        let _ = writeln!(out, "{}", model.create_table_sql(&table));
        for sql in model.add_index_sqls(&table) {
            let _ = writeln!(out, "{};", sql);
        }
        out.push('\n');
    }
    out
}

fn log_derived_ddl(registry: &ModelRegistry) {
    let month = MonthKey::current();
    for model in registry.latest() {
        let table = model.table_name(month);
        debug!(model = model.versioned_name(), sql = %model.create_table_sql(&table), "create table");
        for sql in model.add_index_sqls(&table) {
            debug!(model = model.versioned_name(), sql = %sql, "add index");
        }
    }
}

/// Full pipeline until SIGINT/SIGTERM, then drain.
pub async fn run(settings: &Settings) -> ts_common::Result<DrainReport> {
    info!(config = %settings.redacted_json(), "effective configuration");
    let registry = load_registry(settings)?;
    if settings.debug {
        log_derived_ddl(&registry);
    }
    let store = Arc::new(MySqlStore::connect(&settings.store).await?);

    let pipeline = Pipeline::new(store, registry, PipelineOptions::from_settings(settings));
    let running = pipeline.start().await?;

    wait_for_shutdown_signal().await?;
    running.shutdown().await
}

/// One migration pass for the current and next month.
pub async fn migrate(settings: &Settings) -> ts_common::Result<MigrationReport> {
    let registry = load_registry(settings)?;
    let store = Arc::new(MySqlStore::connect(&settings.store).await?);
    let migrator = Migrator::new(store, registry, MigrationOptions::from_settings(&settings.tlog));
    let report = migrator.run_cycle(MonthKey::current()).await;
    report.log_summary();
    Ok(report)
}

/// Plan, or with `apply` execute, dropping columns no model declares.
pub async fn prune_columns(
    settings: &Settings,
    month: Option<MonthKey>,
    apply: bool,
) -> ts_common::Result<MigrationReport> {
    let registry = load_registry(settings)?;
    let store = Arc::new(MySqlStore::connect(&settings.store).await?);
    let migrator = Migrator::new(store, registry, MigrationOptions::from_settings(&settings.tlog));
    let month = month.unwrap_or_else(MonthKey::current);
    let report = migrator.drop_obsolete_columns(month, apply).await;
    report.log_summary();
    Ok(report)
}

/// Resolves on SIGINT, SIGTERM or Ctrl-C.
pub async fn wait_for_shutdown_signal() -> ts_common::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            _ = signal::ctrl_c() => info!("received Ctrl-C"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl-C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ddl_per_latest_model() {
        let registry = ModelRegistry::from_json_str(
            r#"{"models":[
                {"name":"Kill","version":1,"sharding":"month","fields":[{"name":"victim","type":"varchar(64)","index":true}]},
                {"name":"Kill","version":2,"sharding":"month","fields":[{"name":"victim","type":"varchar(64)"}]}
            ]}"#,
        )
        .unwrap();
        let ddl = render_ddl(&registry, MonthKey::new(2024, 2).unwrap());
        assert!(ddl.contains("-- Killv2 (kill_202402)"));
        assert!(ddl.contains("CREATE TABLE `kill_202402`"));
        assert!(ddl.contains("ALTER TABLE `kill_202402` ADD INDEX `i_logtime`(`logtime`);"));
        assert!(!ddl.contains("i_victim"));
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.code(), 10);
    }
}
