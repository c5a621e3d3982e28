//! Live directory watch.
//!
//! One non-recursive `notify` watch per directory. New directories join
//! the watch set as they appear; new tlog files (created in place or moved
//! in) are forwarded to the control loop as
//! [`ControlMessage::IngestFile`]. Tlog files already present when the
//! watch is set up are forwarded first, so nothing that lands between the
//! startup sync and the watch is left behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{is_tlog_file, IngestError};
use crate::control::{ControlMessage, ControlSender};

pub struct DirWatcher {
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watched: HashSet<PathBuf>,
    backup_root: PathBuf,
    /// Tlog files found while setting up the watch.
    pending: Vec<PathBuf>,
}

impl DirWatcher {
    /// Watch `root` and every directory below it, except `backup_root`.
    pub fn new(root: &Path, backup_root: &Path) -> Result<Self, IngestError> {
        let (tx, events) = mpsc::unbounded_channel();
        let watcher = notify::RecommendedWatcher::new(
            move |result| {
                let _ = tx.send(result);
            },
            notify::Config::default(),
        )?;

        let mut this = Self {
            watcher,
            events,
            watched: HashSet::new(),
            backup_root: backup_root.to_path_buf(),
            pending: Vec::new(),
        };
        this.pending = this.add_tree(root)?;
        info!(
            root = %root.display(),
            dirs = this.watched.len(),
            pending = this.pending.len(),
            "watching"
        );
        Ok(this)
    }

    /// Directories currently watched.
    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    fn excluded(&self, path: &Path) -> bool {
        path.starts_with(&self.backup_root)
    }

    /// Watch `dir` and its subdirectories. Returns tlog files already
    /// present below `dir`.
    fn add_tree(&mut self, dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();
        let backup_root = self.backup_root.clone();
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !entry.path().starts_with(&backup_root));
        for entry in walker {
            let entry = entry.map_err(|source| IngestError::Walk {
                root: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if entry.file_type().is_dir() {
                if self.watched.insert(path.to_path_buf()) {
                    self.watcher.watch(path, RecursiveMode::NonRecursive)?;
                    debug!(dir = %path.display(), "watch added");
                }
            } else if is_tlog_file(path) {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Paths that arrived in a directory, from one event.
    fn arrivals(event: &Event) -> &[PathBuf] {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                &event.paths
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.get(1..).unwrap_or_default()
            }
            _ => &[],
        }
    }

    /// New tlog files implied by `event`. New directories are added to the
    /// watch set along the way.
    fn handle_event(&mut self, event: &Event) -> Vec<PathBuf> {
        let arrivals = Self::arrivals(event);
        if arrivals.is_empty() {
            debug!(kind = ?event.kind, paths = ?event.paths, "ignoring event");
            return Vec::new();
        }

        let mut files = Vec::new();
        for path in arrivals {
            if self.excluded(path) {
                continue;
            }
            if path.is_dir() {
                match self.add_tree(path) {
                    Ok(found) => files.extend(found),
                    Err(e) => warn!(dir = %path.display(), error = %e, "failed to watch new directory"),
                }
            } else if is_tlog_file(path) {
                files.push(path.clone());
            } else {
                debug!(path = %path.display(), "ignoring non-tlog file");
            }
        }
        files
    }

    /// Tlog files found at setup that `run` forwards before any event.
    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// Forward file arrivals until cancelled, the control loop goes away, or
    /// the watcher reports an error.
    pub async fn run(mut self, tx: ControlSender, cancel: CancellationToken) {
        for path in std::mem::take(&mut self.pending) {
            info!(path = %path.display(), "tlog file found at watch setup");
            if !forward(&tx, &cancel, path).await {
                return;
            }
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.events.recv() => event,
            };
            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!(error = %e, "watcher error; stopping watch");
                    break;
                }
                None => break,
            };

            for path in self.handle_event(&event) {
                info!(path = %path.display(), "new tlog file");
                if !forward(&tx, &cancel, path).await {
                    return;
                }
            }
        }
        debug!("watch task stopped");
    }
}

/// Send one file to the control loop. `false` once cancelled or closed.
async fn forward(tx: &ControlSender, cancel: &CancellationToken, path: PathBuf) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(ControlMessage::IngestFile(path)) => sent.is_ok(),
    }
}
