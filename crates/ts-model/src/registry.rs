//! The immutable, process-wide model registry.
//!
//! Built once at startup and shared by `Arc`; there is no hot reload.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::description::{ModelDescription, ModelEntry};
use crate::model::{FieldDefinition, ModelDefinition};

/// Errors from loading the model description.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse XML model description: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("failed to parse JSON model description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate field `{field}` in model {model}")]
    DuplicateField { model: String, field: String },

    #[error("model {0} is declared more than once")]
    DuplicateModel(String),

    #[error("invalid identifier {name:?} in model {model}")]
    InvalidIdentifier { model: String, name: String },
}

impl From<ModelError> for ts_common::Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Io { source, .. } => ts_common::Error::Io(source),
            ModelError::DuplicateField { model, field } => {
                ts_common::Error::DuplicateField { model, field }
            }
            other => ts_common::Error::InvalidModel(other.to_string()),
        }
    }
}

/// Lookup tables over every loaded model.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    by_versioned_name: HashMap<String, Arc<ModelDefinition>>,
    latest_by_name: BTreeMap<String, Arc<ModelDefinition>>,
    all: Vec<Arc<ModelDefinition>>,
}

impl ModelRegistry {
    /// Load a description file; `.xml` files are parsed as XML, anything
    /// else as JSON.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_xml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xml"));
        if is_xml {
            Self::from_xml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, ModelError> {
        Self::from_entries(ModelDescription::from_xml_str(xml)?.models)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        Self::from_entries(ModelDescription::from_json_str(json)?.models)
    }

    /// Build the registry. The highest version of each name becomes its
    /// migration target; on a version tie the first entry wins.
    pub fn from_entries(entries: Vec<ModelEntry>) -> Result<Self, ModelError> {
        let mut registry = ModelRegistry::default();

        for entry in entries {
            let model = Arc::new(build_model(entry)?);
            let key = model.versioned_name().to_string();
            if registry.by_versioned_name.contains_key(&key) {
                return Err(ModelError::DuplicateModel(key));
            }
            debug!(
                model = %key,
                fields = model.fields().len(),
                sharding = %model.sharding(),
                "loaded model"
            );

            let newer = registry
                .latest_by_name
                .get(model.name())
                .map_or(true, |current| model.version() > current.version());
            if newer {
                registry
                    .latest_by_name
                    .insert(model.name().to_string(), Arc::clone(&model));
            }
            registry.by_versioned_name.insert(key, Arc::clone(&model));
            registry.all.push(model);
        }

        Ok(registry)
    }

    /// Exact lookup by `name + "v" + version`.
    pub fn lookup(&self, versioned_name: &str) -> Option<&Arc<ModelDefinition>> {
        self.by_versioned_name.get(versioned_name)
    }

    /// Lookup for an incoming line's type and version.
    pub fn lookup_line(&self, log_type: &str, version: i32) -> Option<&Arc<ModelDefinition>> {
        self.lookup(&format!("{}v{}", log_type, version))
    }

    /// Highest known version of `name`.
    pub fn latest_by_name(&self, name: &str) -> Option<&Arc<ModelDefinition>> {
        self.latest_by_name.get(name)
    }

    /// Latest version of every model, ordered by name.
    pub fn latest(&self) -> impl Iterator<Item = &Arc<ModelDefinition>> {
        self.latest_by_name.values()
    }

    /// Every loaded model, in description order.
    pub fn models(&self) -> &[Arc<ModelDefinition>] {
        &self.all
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

fn build_model(entry: ModelEntry) -> Result<ModelDefinition, ModelError> {
    let versioned = format!("{}v{}", entry.name, entry.version);
    if !is_identifier(&entry.name) {
        return Err(ModelError::InvalidIdentifier {
            model: versioned,
            name: entry.name,
        });
    }

    let declared: Vec<FieldDefinition> = entry
        .fields
        .into_iter()
        .map(|f| FieldDefinition {
            name: f.name,
            sql_type: f.sql_type,
            comment: f.comment,
            indexed: f.index,
        })
        .collect();

    let model = ModelDefinition::new(
        &entry.name,
        entry.version,
        entry.sharding,
        &entry.comment,
        declared,
    );

    let mut seen = HashSet::new();
    for field in model.fields() {
        if !is_identifier(&field.name) {
            return Err(ModelError::InvalidIdentifier {
                model: versioned,
                name: field.name.clone(),
            });
        }
        if !seen.insert(field.name.as_str()) {
            return Err(ModelError::DuplicateField {
                model: versioned,
                field: field.name.clone(),
            });
        }
    }
    Ok(model)
}

/// Names are interpolated into DDL, so only `[A-Za-z0-9_]` is allowed.
fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
