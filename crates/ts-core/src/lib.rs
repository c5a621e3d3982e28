//! tlogsync core: ingestion pipeline, batching engine, schema migration.
//!
//! Lines arrive from a watched directory and from a TCP listener, are
//! batched per log type by a single control task, and are written to the
//! store as multi-row inserts. Table structure is kept in step with the
//! model description by an additive migration pass.

pub mod batch;
pub mod commands;
pub mod control;
pub mod exit_codes;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod store;
pub mod writer;

pub use batch::{Batch, BatchEngine, DropReason, EngineStats, FlushSummary, IngestOutcome};
pub use control::{control_channel, ControlLoop, ControlMessage, ControlSender};
pub use exit_codes::ExitCode;
pub use migrate::{
    plan_missing_columns, plan_missing_indexes, plan_obsolete_columns, DdlKind, MigrationOptions,
    MigrationReport, Migrator, StatementOutcome, StatementStatus,
};
pub use pipeline::{DrainReport, Pipeline, PipelineOptions, PipelineState, RunningPipeline};
pub use store::{InsertStatement, SqlValue, Store, StoreError, TableSnapshot};
pub use writer::{build_insert, check_batch_capacity, BatchWriter, WriteError};
