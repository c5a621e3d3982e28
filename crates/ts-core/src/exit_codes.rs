//! Exit codes for the tlogsync CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.

/// Exit codes for tlogsync operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean exit
    Clean = 0,

    /// Migration pass finished with failed or skipped statements
    MigrationIncomplete = 1,

    /// Configuration error
    ConfigError = 10,

    /// Model description error
    ModelError = 11,

    /// Store connection or DDL error
    StoreError = 12,

    /// Ingestion source setup error (walk, watch, listener bind)
    IngestError = 13,

    /// I/O error
    IoError = 14,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&ts_common::Error> for ExitCode {
    fn from(err: &ts_common::Error) -> Self {
        use ts_common::Error;
        match err {
            Error::Config(_) => ExitCode::ConfigError,
            Error::InvalidModel(_) | Error::DuplicateField { .. } => ExitCode::ModelError,
            Error::Store(_) => ExitCode::StoreError,
            Error::ListenerBind { .. } | Error::Watch(_) => ExitCode::IngestError,
            Error::Io(_) => ExitCode::IoError,
            Error::Internal(_) => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_categories() {
        let bind = ts_common::Error::ListenerBind {
            addr: "0.0.0.0:9999".into(),
            message: "in use".into(),
        };
        assert_eq!(ExitCode::from(&bind), ExitCode::IngestError);
        assert_eq!(
            ExitCode::from(&ts_common::Error::Config("x".into())),
            ExitCode::ConfigError
        );
        assert!(ExitCode::StoreError.is_error());
        assert!(!ExitCode::MigrationIncomplete.is_error());
        assert!(ExitCode::Clean.is_success());
    }
}
