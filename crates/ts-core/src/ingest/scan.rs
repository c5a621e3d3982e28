//! Directory bulk-sync and per-file ingestion.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{is_tlog_file, IngestError};
use crate::batch::BatchEngine;
use crate::store::Store;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Not a tlog file; left alone.
    Ignored,
    /// Every line was fed to the engine. `moved_to` is `None` when the
    /// backup rename failed and the file was left in place.
    Synced {
        lines: usize,
        moved_to: Option<PathBuf>,
    },
    /// Reading stopped early; lines read before the failure were ingested
    /// and the file was left in place.
    ReadFailed { lines: usize },
}

/// Totals for one directory pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub files_synced: usize,
    pub files_ignored: usize,
    pub read_failures: usize,
    pub backup_failures: usize,
    pub lines: usize,
}

impl SyncSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Ignored => self.files_ignored += 1,
            FileOutcome::Synced { lines, moved_to } => {
                self.files_synced += 1;
                self.lines += lines;
                if moved_to.is_none() {
                    self.backup_failures += 1;
                }
            }
            FileOutcome::ReadFailed { lines } => {
                self.read_failures += 1;
                self.lines += lines;
            }
        }
    }
}

/// Reads tlog files under `root` into the engine and moves them into
/// `backup_root` afterwards, keeping their relative path.
#[derive(Debug, Clone)]
pub struct DirectorySync {
    root: PathBuf,
    backup_root: PathBuf,
}

impl DirectorySync {
    pub fn new(root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Whether `path` lies inside the backup directory.
    pub fn in_backup(&self, path: &Path) -> bool {
        path.starts_with(&self.backup_root)
    }

    /// Backup location for `path`: the same path relative to the root,
    /// under the backup root.
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.backup_root.join(relative),
            Err(_) => self
                .backup_root
                .join(path.file_name().unwrap_or(path.as_os_str())),
        }
    }

    /// Every file under the root, in file-name order, skipping the backup
    /// directory. Any walk error aborts the listing.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.in_backup(entry.path()));
        for entry in walker {
            let entry = entry.map_err(|source| IngestError::Walk {
                root: self.root.clone(),
                source,
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Sync every tlog file under the root.
    pub async fn sync_dir<S: Store>(
        &self,
        engine: &mut BatchEngine<S>,
    ) -> Result<SyncSummary, IngestError> {
        let files = self.list_files()?;
        info!(root = %self.root.display(), files = files.len(), "bulk sync");

        let mut summary = SyncSummary::default();
        for path in files {
            let outcome = self.sync_file(engine, &path).await;
            summary.record(&outcome);
        }
        info!(
            synced = summary.files_synced,
            ignored = summary.files_ignored,
            lines = summary.lines,
            read_failures = summary.read_failures,
            backup_failures = summary.backup_failures,
            "bulk sync complete"
        );
        Ok(summary)
    }

    /// Feed every line of `path` to the engine, flush all batches, then
    /// move the file to the backup directory.
    pub async fn sync_file<S: Store>(&self, engine: &mut BatchEngine<S>, path: &Path) -> FileOutcome {
        if !is_tlog_file(path) {
            debug!(path = %path.display(), "ignoring non-tlog file");
            return FileOutcome::Ignored;
        }
        info!(path = %path.display(), "syncing file");

        let (lines, read_error) = match read_lines(engine, path).await {
            Ok(lines) => (lines, None),
            Err((lines, e)) => (lines, Some(e)),
        };
        engine.flush_all().await;

        if let Some(e) = read_error {
            warn!(error = %e, lines, "file read aborted");
            return FileOutcome::ReadFailed { lines };
        }

        let moved_to = match self.backup(path).await {
            Ok(dest) => Some(dest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "backup failed; file left in place");
                None
            }
        };
        FileOutcome::Synced { lines, moved_to }
    }

    /// Move `path` under the backup root, creating parent directories.
    pub async fn backup(&self, path: &Path) -> std::io::Result<PathBuf> {
        let dest = self.backup_path(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(path, &dest).await?;
        debug!(from = %path.display(), to = %dest.display(), "backed up");
        Ok(dest)
    }
}

/// Read `path` line by line into the engine, including a final line with
/// no terminator. Returns the number of lines read, or that number and the
/// error that stopped reading.
async fn read_lines<S: Store>(
    engine: &mut BatchEngine<S>,
    path: &Path,
) -> Result<usize, (usize, IngestError)> {
    let read_err = |lines, source| {
        (
            lines,
            IngestError::Read {
                path: path.to_path_buf(),
                source,
            },
        )
    };
    let file = File::open(path).await.map_err(|e| read_err(0, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut lines = 0;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| read_err(lines, e))?;
        if n == 0 {
            return Ok(lines);
        }
        lines += 1;
        engine.ingest_line(&String::from_utf8_lossy(&buf)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ts_model::ModelRegistry;

    use crate::store::MemoryStore;
    use crate::writer::BatchWriter;

    const MODELS: &str = r#"{"models":[{"name":"kill","version":1,"sharding":"month","comment":"",
        "fields":[{"name":"attacker","type":"varchar(64)"},{"name":"victim","type":"varchar(64)"}]}]}"#;

    fn engine() -> (Arc<MemoryStore>, BatchEngine<MemoryStore>) {
        let registry = Arc::new(ModelRegistry::from_json_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(Arc::clone(&store));
        (store, BatchEngine::new(registry, writer, 100))
    }

    #[test]
    fn backup_path_mirrors_relative_path() {
        let sync = DirectorySync::new("/data/tlog", "/data/backup");
        assert_eq!(
            sync.backup_path(Path::new("/data/tlog/zone1/a_tlog_1.log")),
            PathBuf::from("/data/backup/zone1/a_tlog_1.log")
        );
        assert_eq!(
            sync.backup_path(Path::new("/elsewhere/a_tlog_1.log")),
            PathBuf::from("/data/backup/a_tlog_1.log")
        );
    }

    #[tokio::test]
    async fn syncs_file_with_unterminated_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tlog");
        let backup = dir.path().join("backup");
        std::fs::create_dir_all(root.join("zone1")).unwrap();
        let file = root.join("zone1").join("game_tlog_1.log");
        std::fs::write(
            &file,
            "kill|1|1700000000|alice|bob\nkill|1|1700000001|carol|dave",
        )
        .unwrap();

        let (store, mut engine) = engine();
        let sync = DirectorySync::new(&root, &backup);
        let outcome = sync.sync_file(&mut engine, &file).await;

        let dest = backup.join("zone1").join("game_tlog_1.log");
        assert_eq!(
            outcome,
            FileOutcome::Synced {
                lines: 2,
                moved_to: Some(dest.clone())
            }
        );
        assert!(dest.exists());
        assert!(!file.exists());
        assert_eq!(store.inserts().len(), 1);
        assert_eq!(store.inserts()[0].rows, 2);
    }

    #[tokio::test]
    async fn sync_dir_skips_other_files_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let backup = root.join("backup");
        std::fs::create_dir_all(&backup).unwrap();
        std::fs::write(root.join("a_tlog_1.log"), "kill|1|1700000000|a|b\n").unwrap();
        std::fs::write(root.join("notes.txt"), "kill|1|1700000000|a|b\n").unwrap();
        std::fs::write(backup.join("old_tlog_1.log"), "kill|1|1700000000|a|b\n").unwrap();

        let (store, mut engine) = engine();
        let summary = DirectorySync::new(&root, &backup)
            .sync_dir(&mut engine)
            .await
            .unwrap();

        assert_eq!(summary.files_synced, 1);
        assert_eq!(summary.files_ignored, 1);
        assert_eq!(store.inserts().len(), 1);
        assert!(root.join("notes.txt").exists());
        assert!(backup.join("a_tlog_1.log").exists());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut engine) = engine();
        let result = DirectorySync::new(dir.path().join("absent"), dir.path().join("b"))
            .sync_dir(&mut engine)
            .await;
        assert!(matches!(result, Err(IngestError::Walk { .. })));
    }
}
