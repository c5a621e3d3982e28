//! The control loop: sole owner of the [`BatchEngine`].
//!
//! Producers send [`ControlMessage`]s over a bounded channel. The loop
//! applies them one at a time, flushes everything on a periodic tick, and on
//! cancellation stops ticking and drains the queue until every sender is
//! gone. It then hands the engine back so the caller can run the final
//! flush. Losing every producer early does not stop the ticker; only
//! cancellation ends the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchEngine;
use crate::ingest::DirectorySync;
use crate::store::Store;

/// Unit of work for the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Sync a whole file, then back it up.
    IngestFile(PathBuf),
    /// Ingest one raw line.
    IngestLine(String),
}

pub type ControlSender = mpsc::Sender<ControlMessage>;
pub type ControlReceiver = mpsc::Receiver<ControlMessage>;

/// Bounded control channel. A zero capacity is raised to 1.
pub fn control_channel(capacity: usize) -> (ControlSender, ControlReceiver) {
    mpsc::channel(capacity.max(1))
}

pub struct ControlLoop<S: Store> {
    engine: BatchEngine<S>,
    sync: Arc<DirectorySync>,
    rx: ControlReceiver,
    flush_interval: Duration,
    cancel: CancellationToken,
}

impl<S: Store> ControlLoop<S> {
    pub fn new(
        engine: BatchEngine<S>,
        sync: Arc<DirectorySync>,
        rx: ControlReceiver,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            sync,
            rx,
            flush_interval,
            cancel,
        }
    }

    async fn handle(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::IngestLine(line) => {
                self.engine.ingest_line(&line).await;
            }
            ControlMessage::IngestFile(path) => {
                self.sync.sync_file(&mut self.engine, &path).await;
            }
        }
    }

    /// Run until cancelled and drained. Returns the engine with whatever is
    /// still buffered.
    pub async fn run(mut self) -> BatchEngine<S> {
        let period = self.flush_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(flush_interval_ms = period.as_millis() as u64, "control loop started");

        let mut rx_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = self.rx.recv(), if rx_open => match message {
                    Some(message) => self.handle(message).await,
                    None => {
                        info!("all producers closed, flushing on tick until shutdown");
                        rx_open = false;
                    }
                },
                _ = ticker.tick() => {
                    debug!(pending = self.engine.pending_records(), "flush tick");
                    self.engine.flush_all().await;
                }
            }
        }

        let mut drained = 0usize;
        while let Some(message) = self.rx.recv().await {
            self.handle(message).await;
            drained += 1;
        }
        info!(drained, "control loop drained");
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::writer::BatchWriter;
    use ts_model::ModelRegistry;

    const MODELS: &str = r#"{"models":[{"name":"kill","version":1,"sharding":"month",
        "fields":[{"name":"attacker","type":"varchar(64)"},{"name":"victim","type":"varchar(64)"}]}]}"#;

    fn control(
        flush_interval: Duration,
    ) -> (Arc<MemoryStore>, ControlSender, CancellationToken, ControlLoop<MemoryStore>) {
        let registry = Arc::new(ModelRegistry::from_json_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new());
        let engine = BatchEngine::new(registry, BatchWriter::new(Arc::clone(&store)), 100);
        let (tx, rx) = control_channel(1);
        let cancel = CancellationToken::new();
        let sync = Arc::new(DirectorySync::new("tlog", "tlog_backup"));
        let control = ControlLoop::new(engine, sync, rx, flush_interval, cancel.clone());
        (store, tx, cancel, control)
    }

    #[tokio::test]
    async fn drains_queue_after_cancel() {
        let (store, tx, cancel, control) = control(Duration::from_secs(3600));
        let task = tokio::spawn(control.run());

        tx.send(ControlMessage::IngestLine("kill|1|1700000000|a|b".into()))
            .await
            .unwrap();
        cancel.cancel();
        let late = tx.clone();
        late.send(ControlMessage::IngestLine("kill|1|1700000001|c|d".into()))
            .await
            .unwrap();
        drop(tx);
        drop(late);

        let engine = task.await.unwrap();
        assert_eq!(engine.pending_records(), 2);
        assert!(store.inserts().is_empty());
        assert_eq!(engine.stats().flush_all_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_flushes_pending_batches() {
        let (store, tx, cancel, control) = control(Duration::from_secs(5));
        let task = tokio::spawn(control.run());

        tx.send(ControlMessage::IngestLine("kill|1|1700000000|a|b".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.inserts().len(), 1);

        cancel.cancel();
        drop(tx);
        let engine = task.await.unwrap();
        assert_eq!(engine.pending_records(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_ticking_after_producers_close() {
        let (store, tx, cancel, control) = control(Duration::from_secs(5));
        let task = tokio::spawn(control.run());

        tx.send(ControlMessage::IngestLine("kill|1|1700000000|a|b".into()))
            .await
            .unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!task.is_finished());
        assert_eq!(store.inserts().len(), 1);

        cancel.cancel();
        let engine = task.await.unwrap();
        assert_eq!(engine.pending_records(), 0);
        assert!(engine.stats().flush_all_calls >= 11);
    }
}
