//! Model catalog: the logical models the orchestrator can serve.
//!
//! The catalog is owned by the caller; the orchestrator only reads the model
//! identifier, its numeric id (for port derivation) and the parameter sets.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ModelCatalog {
    #[serde(default, rename = "model")]
    pub models: Vec<AiModel>,
}

/// A logical model, e.g. `llama2` with id 3
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AiModel {
    pub id: u32,
    /// Display name
    pub name: String,
    /// Engine identifier, e.g. `llama2`
    pub model: String,
    #[serde(default)]
    pub versions: Vec<ModelVersion>,
}

/// One parameter set of a model, e.g. `7b`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModelVersion {
    pub parameters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl ModelVersion {
    pub fn new(parameters: impl Into<String>) -> Self {
        Self {
            parameters: parameters.into(),
            size: None,
        }
    }
}

impl AiModel {
    pub fn new(id: u32, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            id,
            name: model.clone(),
            model,
            versions: Vec::new(),
        }
    }

    pub fn with_version(mut self, parameters: impl Into<String>) -> Self {
        self.versions.push(ModelVersion::new(parameters));
        self
    }

    pub fn version(&self, parameters: &str) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.parameters == parameters)
    }
}

impl ModelCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            "📚 Loaded {} models from catalog {:?}",
            catalog.models.len(),
            path
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let catalog: ModelCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn find(&self, model: &str) -> Option<&AiModel> {
        self.models.iter().find(|m| m.model == model)
    }

    /// Resolve a (model, parameters) pair the way the web layer does.
    pub fn resolve(&self, model: &str, parameters: &str) -> Option<(&AiModel, &ModelVersion)> {
        let ai_model = self.find(model)?;
        let version = ai_model.version(parameters)?;
        Some((ai_model, version))
    }

    /// Identifiers must be usable inside container names. Duplicate numeric ids
    /// are tolerated but reported, since they map two models onto one port.
    pub fn validate(&self) -> Result<()> {
        let mut identifiers = HashSet::new();
        let mut ids: HashMap<u32, &str> = HashMap::new();

        for model in &self.models {
            if !is_name_component(&model.model) {
                return Err(ConfigError::Invalid {
                    reason: format!("model identifier '{}' is not a valid name", model.model),
                }
                .into());
            }
            if !identifiers.insert(model.model.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("model '{}' listed twice", model.model),
                }
                .into());
            }
            if let Some(other) = ids.insert(model.id, &model.model) {
                warn!(
                    "⚠️  Models '{}' and '{}' share numeric id {} and will share a host port",
                    other, model.model, model.id
                );
            }
            for version in &model.versions {
                if !is_name_component(&version.parameters) {
                    return Err(ConfigError::Invalid {
                        reason: format!(
                            "parameters '{}' of model '{}' are not a valid name",
                            version.parameters, model.model
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// Characters the daemon accepts in container names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`
pub fn is_name_component(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
