//! Configuration file resolution.
//!
//! Precedence:
//! 1. explicit path (`--config`)
//! 2. `TLOGSYNC_CONFIG` environment variable
//! 3. `./tlogsync.toml`
//! 4. `<XDG config dir>/tlogsync/config.toml`

use std::path::{Path, PathBuf};

use crate::settings::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TLOGSYNC_CONFIG";

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "tlogsync.toml";

/// Resolve the configuration file to load.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    resolve_from(explicit, env, &default_candidates())
}

fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("tlogsync").join("config.toml"));
    }
    candidates
}

/// Explicit and environment paths are returned as-is so that a typo
/// surfaces as a read error naming the path; fallbacks must exist.
fn resolve_from(
    explicit: Option<&Path>,
    env: Option<PathBuf>,
    candidates: &[PathBuf],
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound(candidates.to_vec()))
}
