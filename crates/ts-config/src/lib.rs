//! tlogsync configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the TOML configuration file
//! - Config path resolution (CLI → env → working dir → XDG)
//! - Semantic validation with every violation reported at once

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_config_path, CONFIG_ENV, CONFIG_FILE_NAME};
pub use settings::{ConfigError, Settings, StoreSettings, TlogSettings};
pub use validate::{ValidationError, ValidationResult};
