//! tlogsync common types, wire parsing, and errors.
//!
//! This crate provides foundational types shared across the tlogsync crates:
//! - The pipe-delimited log line wire format
//! - Calendar month keys used for table sharding
//! - Common error types

pub mod error;
pub mod line;
pub mod month;

pub use error::{Error, Result};
pub use line::{LineError, LogLine, FIELD_DELIMITER};
pub use month::MonthKey;
