//! tlogsync model registry.
//!
//! This crate provides:
//! - Parsing of the versioned model description (XML or JSON)
//! - Field and model definitions with the fixed audit columns prepended
//! - SQL fragment derivation (column list, CREATE TABLE, ALTER TABLE)
//! - The immutable [`ModelRegistry`] used by ingestion and migration

pub mod description;
pub mod model;
pub mod registry;

pub use description::{FieldEntry, ModelDescription, ModelEntry};
pub use model::{audit_fields, drop_column_sql, FieldDefinition, ModelDefinition, Sharding, AUDIT_FIELD_COUNT};
pub use registry::{ModelError, ModelRegistry};
