//! Error types for tlogsync.

use thiserror::Error;

/// Result type alias for tlogsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for tlogsync.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Model description errors (20-29)
    #[error("invalid model description: {0}")]
    InvalidModel(String),

    #[error("duplicate field `{field}` in model {model}")]
    DuplicateField { model: String, field: String },

    // Store errors (30-39)
    #[error("store error: {0}")]
    Store(String),

    // Ingestion errors (40-49)
    #[error("listener bind failed on {addr}: {message}")]
    ListenerBind { addr: String, message: String },

    #[error("watch setup failed: {0}")]
    Watch(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors (90-99)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in logs.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidModel(_) => 20,
            Error::DuplicateField { .. } => 21,
            Error::Store(_) => 30,
            Error::ListenerBind { .. } => 41,
            Error::Watch(_) => 42,
            Error::Io(_) => 60,
            Error::Internal(_) => 99,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(
            Error::DuplicateField {
                model: "kill".into(),
                field: "logtime".into()
            }
            .code(),
            21
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(io).code(), 60);
    }

    #[test]
    fn display_names_the_offending_field() {
        let err = Error::DuplicateField {
            model: "killv1".into(),
            field: "victim".into(),
        };
        assert_eq!(err.to_string(), "duplicate field `victim` in model killv1");
    }
}
