//! Ingestion sources: directory bulk-sync, live directory watch, and the
//! TCP line listener.
//!
//! Sources never touch the batch map. The watcher and the listener only
//! send [`ControlMessage`](crate::control::ControlMessage)s; bulk-sync runs
//! either before the control loop starts or inside it.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub mod listener;
pub mod scan;
pub mod watch;

pub use listener::LineListener;
pub use scan::{DirectorySync, FileOutcome, SyncSummary};
pub use watch::DirWatcher;

static TLOG_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*_tlog_[0-9]+\.log$").expect("tlog file pattern"));

/// Errors from setting up or running an ingestion source.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<IngestError> for ts_common::Error {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Bind { addr, source } => ts_common::Error::ListenerBind {
                addr,
                message: source.to_string(),
            },
            IngestError::Watch(e) => ts_common::Error::Watch(e.to_string()),
            IngestError::Read { source, .. } => ts_common::Error::Io(source),
            walk @ IngestError::Walk { .. } => {
                ts_common::Error::Io(std::io::Error::other(walk.to_string()))
            }
        }
    }
}

/// Whether `path` names a tlog file: `<prefix>_tlog_<digits>.log`.
pub fn is_tlog_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| TLOG_FILE.is_match(name))
}
