//! Pipeline lifecycle and the shutdown drain.
//!
//! ```text
//! Stopped -> Starting -> Running -> Draining -> Stopped
//! ```
//!
//! Startup runs one migration pass, bulk-syncs the directory, then starts
//! the watcher, the optional listener, the control loop and the migration
//! timer. Shutdown enters `Draining`, cancels every task, waits for the
//! producers, waits for the control loop to drain, and only then flushes
//! every batch, once.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ts_common::MonthKey;
use ts_config::Settings;
use ts_model::ModelRegistry;

use crate::batch::{BatchEngine, EngineStats, FlushSummary};
use crate::control::{control_channel, ControlLoop};
use crate::ingest::{DirWatcher, DirectorySync, LineListener, SyncSummary};
use crate::migrate::{MigrationOptions, MigrationReport, Migrator};
use crate::store::Store;
use crate::writer::{check_batch_capacity, BatchWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Draining,
}

/// Runtime knobs, usually derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dir: PathBuf,
    pub backup_dir: PathBuf,
    /// `None` disables the TCP listener.
    pub listen: Option<String>,
    pub batch_write: usize,
    pub flush_interval: Duration,
    pub migrate_interval: Duration,
    pub channel_capacity: usize,
    pub shutdown_grace: Duration,
    pub migration: MigrationOptions,
    /// Log every insert statement at debug level.
    pub log_statements: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let tlog = &settings.tlog;
        Self {
            dir: tlog.dir.clone(),
            backup_dir: tlog.backup_dir.clone(),
            listen: tlog.listen_addr().map(str::to_string),
            batch_write: tlog.batch_write,
            flush_interval: tlog.flush_interval(),
            migrate_interval: tlog.migrate_interval(),
            channel_capacity: tlog.channel_capacity,
            shutdown_grace: tlog.shutdown_grace(),
            migration: MigrationOptions::from_settings(tlog),
            log_statements: settings.debug,
        }
    }
}

/// What shutdown left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub flush: FlushSummary,
    pub stats: EngineStats,
    /// Whether the migration timer had to be aborted.
    pub migration_aborted: bool,
}

/// A configured, not yet started pipeline.
pub struct Pipeline<S: Store> {
    store: Arc<S>,
    registry: Arc<ModelRegistry>,
    options: PipelineOptions,
    state: Arc<watch::Sender<PipelineState>>,
}

impl<S: Store> Pipeline<S> {
    pub fn new(store: Arc<S>, registry: Arc<ModelRegistry>, options: PipelineOptions) -> Self {
        let (state, _) = watch::channel(PipelineState::Stopped);
        Self {
            store,
            registry,
            options,
            state: Arc::new(state),
        }
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
        debug!(state = ?state, "pipeline state");
    }

    /// Run the startup sequence and spawn every task. On error the pipeline
    /// returns to `Stopped` and nothing is left running.
    pub async fn start(self) -> ts_common::Result<RunningPipeline<S>> {
        self.set_state(PipelineState::Starting);
        match self.start_tasks().await {
            Ok(running) => Ok(running),
            Err(e) => {
                self.set_state(PipelineState::Stopped);
                Err(e)
            }
        }
    }

    async fn start_tasks(&self) -> ts_common::Result<RunningPipeline<S>> {
        let options = &self.options;
        check_batch_capacity(&self.registry, options.batch_write).map_err(|e| {
            ts_common::Error::Config(format!("batch_write {} is too large: {}", options.batch_write, e))
        })?;

        let migrator = Migrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            options.migration,
        );
        let startup_migration = migrator.run_cycle(MonthKey::current()).await;
        startup_migration.log_summary();

        let writer = BatchWriter::new(Arc::clone(&self.store)).with_statement_logging(options.log_statements);
        let mut engine = BatchEngine::new(Arc::clone(&self.registry), writer, options.batch_write);
        let sync = Arc::new(DirectorySync::new(&options.dir, &options.backup_dir));
        let startup_sync = sync.sync_dir(&mut engine).await?;

        let watcher = DirWatcher::new(&options.dir, &options.backup_dir)?;
        let listener = match options.listen.as_deref() {
            Some(addr) => Some(LineListener::bind(addr).await?),
            None => {
                info!("listener disabled");
                None
            }
        };
        let listen_addr = listener.as_ref().map(LineListener::local_addr);

        let cancel = CancellationToken::new();
        let (tx, rx) = control_channel(options.channel_capacity);

        let watch_task = tokio::spawn(watcher.run(tx.clone(), cancel.clone()));
        let listener_task = listener.map(|l| tokio::spawn(l.run(tx.clone(), cancel.clone())));
        let control = ControlLoop::new(engine, sync, rx, options.flush_interval, cancel.clone());
        let control_task = tokio::spawn(control.run());
        let migration_task = tokio::spawn(migration_timer(
            migrator,
            options.migrate_interval,
            cancel.clone(),
        ));
        drop(tx);

        self.set_state(PipelineState::Running);
        info!(
            dir = %options.dir.display(),
            listen = ?listen_addr,
            models = self.registry.len(),
            "pipeline running"
        );

        Ok(RunningPipeline {
            cancel,
            state: Arc::clone(&self.state),
            listen_addr,
            startup_migration,
            startup_sync,
            shutdown_grace: options.shutdown_grace,
            watch_task,
            listener_task,
            control_task,
            migration_task,
        })
    }
}

/// Re-run the migration pass every `period` until cancelled.
async fn migration_timer<S: Store>(migrator: Migrator<S>, period: Duration, cancel: CancellationToken) {
    let period = period.max(Duration::from_secs(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                migrator.run_cycle(MonthKey::current()).await.log_summary();
            }
        }
    }
    debug!("migration timer stopped");
}

/// A started pipeline. Call [`RunningPipeline::shutdown`] to stop it.
pub struct RunningPipeline<S: Store> {
    cancel: CancellationToken,
    state: Arc<watch::Sender<PipelineState>>,
    listen_addr: Option<SocketAddr>,
    startup_migration: MigrationReport,
    startup_sync: SyncSummary,
    shutdown_grace: Duration,
    watch_task: JoinHandle<()>,
    listener_task: Option<JoinHandle<()>>,
    control_task: JoinHandle<BatchEngine<S>>,
    migration_task: JoinHandle<()>,
}

impl<S: Store> RunningPipeline<S> {
    /// Bound listener address, when the listener is enabled.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn startup_migration(&self) -> &MigrationReport {
        &self.startup_migration
    }

    pub fn startup_sync(&self) -> SyncSummary {
        self.startup_sync
    }

    /// Stop producers, drain the control loop, flush every batch once.
    pub async fn shutdown(self) -> ts_common::Result<DrainReport> {
        info!("shutting down");
        self.state.send_replace(PipelineState::Draining);
        self.cancel.cancel();

        if let Err(e) = self.watch_task.await {
            warn!(error = %e, "watch task failed");
        }
        if let Some(listener) = self.listener_task {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
        }

        let mut migration = self.migration_task;
        let migration_aborted = match tokio::time::timeout(self.shutdown_grace, &mut migration).await {
            Ok(_) => false,
            Err(_) => {
                warn!(grace_ms = self.shutdown_grace.as_millis() as u64, "aborting migration pass");
                migration.abort();
                true
            }
        };

        let mut engine = match self.control_task.await {
            Ok(engine) => engine,
            Err(e) => {
                error!(error = %e, "control task failed; buffered records lost");
                self.state.send_replace(PipelineState::Stopped);
                return Err(ts_common::Error::Internal(format!("control task failed: {}", e)));
            }
        };

        let flush = engine.flush_all().await;
        let stats = engine.stats();
        self.state.send_replace(PipelineState::Stopped);
        info!(
            batches = flush.batches,
            rows = flush.rows_written,
            failed = flush.failed,
            accepted = stats.accepted,
            rows_written = stats.rows_written,
            "shutdown complete"
        );

        Ok(DrainReport {
            flush,
            stats,
            migration_aborted,
        })
    }
}
