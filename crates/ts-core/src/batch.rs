//! Per-type batching engine.
//!
//! [`BatchEngine`] owns the map from log type to the open [`Batch`]. It is
//! not shared: the control loop holds it exclusively and every mutation goes
//! through [`BatchEngine::ingest_line`] or [`BatchEngine::flush_all`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use ts_common::{LineError, LogLine, MonthKey};
use ts_model::{ModelDefinition, ModelRegistry};

use crate::store::Store;
use crate::writer::BatchWriter;

/// Records of one log type waiting to be written.
///
/// All records share `month` and `version`; a record that does not forces
/// the batch to be flushed first.
#[derive(Debug, Clone)]
pub struct Batch {
    pub model: Arc<ModelDefinition>,
    pub month: MonthKey,
    pub version: i32,
    pub first_logtime: i64,
    pub records: Vec<LogLine>,
}

impl Batch {
    fn start(model: Arc<ModelDefinition>, first: LogLine) -> Self {
        Self {
            model,
            month: first.month,
            version: first.version,
            first_logtime: first.logtime,
            records: vec![first],
        }
    }

    /// Whether `line` can join this batch without breaking homogeneity.
    pub fn accepts(&self, line: &LogLine) -> bool {
        self.month == line.month && self.version == line.version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Physical table the batch is written to.
    pub fn table_name(&self) -> String {
        self.model.table_name(self.month)
    }
}

/// Why a line was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(LineError),
    UnknownModel(String),
    FieldCount {
        model: String,
        expected: usize,
        actual: usize,
    },
}

/// Result of feeding one line to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended; the batch now holds `len` records. `rotated` is set when
    /// a month or version change flushed the previous batch first.
    Buffered { len: usize, rotated: bool },
    /// Appended and the batch reached the threshold and was flushed.
    Flushed { rows: usize, rotated: bool },
    Dropped(DropReason),
}

/// Counters kept by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub accepted: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_model: u64,
    pub dropped_field_count: u64,
    pub batches_flushed: u64,
    pub rows_written: u64,
    pub failed_inserts: u64,
    pub rows_discarded: u64,
    pub flush_all_calls: u64,
}

/// Totals for one `flush_all` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushSummary {
    pub batches: usize,
    pub rows_written: u64,
    pub failed: usize,
}

pub struct BatchEngine<S: Store> {
    registry: Arc<ModelRegistry>,
    writer: BatchWriter<S>,
    threshold: usize,
    batches: HashMap<String, Batch>,
    stats: EngineStats,
}

impl<S: Store> BatchEngine<S> {
    /// `threshold` is clamped to at least 1.
    pub fn new(registry: Arc<ModelRegistry>, writer: BatchWriter<S>, threshold: usize) -> Self {
        Self {
            registry,
            writer,
            threshold: threshold.max(1),
            batches: HashMap::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Open batch for `log_type`, if any.
    pub fn batch(&self, log_type: &str) -> Option<&Batch> {
        self.batches.get(log_type)
    }

    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn pending_records(&self) -> usize {
        self.batches.values().map(Batch::len).sum()
    }

    /// Parse, validate and buffer one raw line.
    pub async fn ingest_line(&mut self, raw: &str) -> IngestOutcome {
        let line = match LogLine::parse(raw) {
            Ok(line) => line,
            Err(e) => {
                if e != LineError::Empty {
                    warn!(error = %e, line = raw.trim(), "dropping malformed line");
                }
                self.stats.dropped_malformed += 1;
                return IngestOutcome::Dropped(DropReason::Malformed(e));
            }
        };

        let model = match self.registry.lookup_line(&line.log_type, line.version) {
            Some(model) => Arc::clone(model),
            None => {
                let key = line.versioned_name();
                warn!(model = %key, "dropping line for unknown model");
                self.stats.dropped_unknown_model += 1;
                return IngestOutcome::Dropped(DropReason::UnknownModel(key));
            }
        };

        let expected = model.declared_field_count();
        if line.values.len() != expected {
            warn!(
                model = model.versioned_name(),
                expected,
                actual = line.values.len(),
                "dropping line with wrong field count"
            );
            self.stats.dropped_field_count += 1;
            return IngestOutcome::Dropped(DropReason::FieldCount {
                model: model.versioned_name().to_string(),
                expected,
                actual: line.values.len(),
            });
        }

        let mut rotated = false;
        if let Some(open) = self.batches.get(&line.log_type) {
            if !open.accepts(&line) {
                debug!(
                    log_type = %line.log_type,
                    from_month = %open.month,
                    to_month = %line.month,
                    from_version = open.version,
                    to_version = line.version,
                    "batch boundary"
                );
                if let Some(previous) = self.batches.remove(&line.log_type) {
                    self.flush(previous).await;
                }
                rotated = true;
            }
        }

        self.stats.accepted += 1;
        let log_type = line.log_type.clone();
        let len = match self.batches.get_mut(&log_type) {
            Some(open) => {
                open.records.push(line);
                open.len()
            }
            None => {
                self.batches
                    .insert(log_type.clone(), Batch::start(model, line));
                1
            }
        };

        if len >= self.threshold {
            if let Some(full) = self.batches.remove(&log_type) {
                self.flush(full).await;
            }
            return IngestOutcome::Flushed { rows: len, rotated };
        }
        IngestOutcome::Buffered { len, rotated }
    }

    /// Write one batch. Failures are logged and the batch is discarded.
    async fn flush(&mut self, batch: Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.writer.insert(&batch).await {
            Ok(_) => {
                self.stats.batches_flushed += 1;
                self.stats.rows_written += batch.len() as u64;
                true
            }
            Err(e) => {
                warn!(
                    model = batch.model.versioned_name(),
                    table = %batch.table_name(),
                    rows = batch.len(),
                    error = %e,
                    "discarding batch"
                );
                self.stats.failed_inserts += 1;
                self.stats.rows_discarded += batch.len() as u64;
                false
            }
        }
    }

    /// Flush every open batch and clear the map.
    pub async fn flush_all(&mut self) -> FlushSummary {
        self.stats.flush_all_calls += 1;
        let mut keys: Vec<String> = self.batches.keys().cloned().collect();
        keys.sort();

        let mut summary = FlushSummary::default();
        for key in keys {
            let Some(batch) = self.batches.remove(&key) else {
                continue;
            };
            let rows = batch.len() as u64;
            summary.batches += 1;
            if self.flush(batch).await {
                summary.rows_written += rows;
            } else {
                summary.failed += 1;
            }
        }
        if summary.batches > 0 {
            info!(
                batches = summary.batches,
                rows = summary.rows_written,
                failed = summary.failed,
                "flushed all batches"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const MODELS: &str = r#"
        <tlogs>
            <tlog name="kill" version="1" sharding="month" comment="kills">
                <field name="attacker" type="varchar(64)" comment="" />
                <field name="victim" type="varchar(64)" comment="" index="true" />
            </tlog>
            <tlog name="kill" version="2" sharding="month" comment="kills">
                <field name="attacker" type="varchar(64)" comment="" />
                <field name="victim" type="varchar(64)" comment="" />
                <field name="weapon" type="int" comment="" />
            </tlog>
        </tlogs>
    "#;

    fn engine(threshold: usize) -> (Arc<MemoryStore>, BatchEngine<MemoryStore>) {
        let registry = Arc::new(ModelRegistry::from_xml_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(Arc::clone(&store));
        (store, BatchEngine::new(registry, writer, threshold))
    }

    #[tokio::test]
    async fn fresh_batch_records_month_and_version() {
        let (_, mut engine) = engine(10);
        let outcome = engine.ingest_line("kill|1|1700000000|alice|bob\n").await;
        assert_eq!(outcome, IngestOutcome::Buffered { len: 1, rotated: false });

        let batch = engine.batch("kill").unwrap();
        assert_eq!(batch.month.as_u32(), 202311);
        assert_eq!(batch.version, 1);
        assert_eq!(batch.first_logtime, 1_700_000_000);
    }

    #[tokio::test]
    async fn version_change_rotates_batch() {
        let (store, mut engine) = engine(10);
        engine.ingest_line("kill|1|1700000000|alice|bob").await;
        engine.ingest_line("kill|1|1700000001|carol|dave").await;
        let outcome = engine.ingest_line("kill|2|1700000002|eve|frank|3").await;

        assert_eq!(outcome, IngestOutcome::Buffered { len: 1, rotated: true });
        let inserts = store.inserts();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].rows, 2);
        assert_eq!(engine.batch("kill").unwrap().version, 2);
    }

    #[tokio::test]
    async fn malformed_lines_are_counted() {
        let (store, mut engine) = engine(10);
        assert!(matches!(
            engine.ingest_line("kill|x|1700000000|a|b").await,
            IngestOutcome::Dropped(DropReason::Malformed(LineError::InvalidVersion(_)))
        ));
        assert!(matches!(
            engine.ingest_line("").await,
            IngestOutcome::Dropped(DropReason::Malformed(LineError::Empty))
        ));
        assert_eq!(engine.stats().dropped_malformed, 2);
        assert_eq!(engine.pending_batches(), 0);
        assert!(store.inserts().is_empty());
    }

    #[tokio::test]
    async fn flush_all_empties_map() {
        let (store, mut engine) = engine(10);
        engine.ingest_line("kill|1|1700000000|alice|bob").await;
        let summary = engine.flush_all().await;
        assert_eq!(summary, FlushSummary { batches: 1, rows_written: 1, failed: 0 });
        assert_eq!(engine.pending_batches(), 0);
        assert_eq!(store.inserts().len(), 1);

        let empty = engine.flush_all().await;
        assert_eq!(empty.batches, 0);
        assert_eq!(engine.stats().flush_all_calls, 2);
    }
}
