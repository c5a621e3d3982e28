//! Semantic validation of a parsed configuration.

use std::fmt;

use crate::settings::Settings;

/// One violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending key, e.g. `tlog.batch_write`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Check every constraint and report all violations together.
pub fn validate(settings: &Settings) -> ValidationResult {
    let mut errors = Vec::new();
    let tlog = &settings.tlog;

    if settings.store.database.trim().is_empty() {
        errors.push(ValidationError::new("store.database", "must not be empty"));
    }
    if settings.store.max_connections == 0 {
        errors.push(ValidationError::new("store.max_connections", "must be at least 1"));
    }
    if tlog.batch_write == 0 {
        errors.push(ValidationError::new("tlog.batch_write", "must be at least 1"));
    }
    if tlog.flush_interval_secs == 0 {
        errors.push(ValidationError::new("tlog.flush_interval_secs", "must be at least 1"));
    }
    if tlog.migrate_interval_secs == 0 {
        errors.push(ValidationError::new("tlog.migrate_interval_secs", "must be at least 1"));
    }
    if tlog.channel_capacity == 0 {
        errors.push(ValidationError::new(
            "tlog.channel_capacity",
            "must be at least 1 (a zero-capacity queue cannot apply backpressure)",
        ));
    }
    if tlog.dir.as_os_str().is_empty() {
        errors.push(ValidationError::new("tlog.dir", "must not be empty"));
    }
    if tlog.backup_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new("tlog.backup_dir", "must not be empty"));
    }
    if !tlog.dir.as_os_str().is_empty() && tlog.dir == tlog.backup_dir {
        errors.push(ValidationError::new(
            "tlog.backup_dir",
            "must differ from tlog.dir, or backed-up files would be ingested again",
        ));
    }
    if tlog.model_file.as_os_str().is_empty() {
        errors.push(ValidationError::new("tlog.model_file", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
