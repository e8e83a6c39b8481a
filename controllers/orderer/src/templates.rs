//! Named object templates.
//!
//! Templates are Kubernetes manifests in YAML. They are compiled into the
//! binary, or read from `TEMPLATE_DIR` once at start-up so that operators can
//! ship their own shapes. Loading yields a generic JSON object; typing it is
//! the caller's concern.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

pub const SECRET_TEMPLATE: &str = "orderer/orderer_secret.yaml";
pub const SERVICE_TEMPLATE: &str = "orderer/orderer_service.yaml";
pub const STATEFUL_SET_TEMPLATE: &str = "orderer/orderer_statefulset.yaml";
pub const CONFIG_MAP_TEMPLATE: &str = "fabric/fabric_configmap.yaml";

/// Every template the controller needs
pub const TEMPLATE_NAMES: [&str; 4] = [
    SECRET_TEMPLATE,
    SERVICE_TEMPLATE,
    STATEFUL_SET_TEMPLATE,
    CONFIG_MAP_TEMPLATE,
];

/// Errors raised while loading templates
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template {0} not found")]
    NotFound(String),

    #[error("failed to read template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Source of named templates
pub trait TemplateStore: Send + Sync {
    /// Loads a fresh copy of the named template as a generic object
    fn load(&self, name: &str) -> Result<serde_json::Value, TemplateError>;
}

/// Templates held in memory, keyed by name
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    sources: HashMap<String, String>,
}

impl TemplateRegistry {
    /// The templates shipped with the controller
    pub fn embedded() -> Self {
        let sources = [
            (SECRET_TEMPLATE, include_str!("../templates/orderer/orderer_secret.yaml")),
            (SERVICE_TEMPLATE, include_str!("../templates/orderer/orderer_service.yaml")),
            (STATEFUL_SET_TEMPLATE, include_str!("../templates/orderer/orderer_statefulset.yaml")),
            (CONFIG_MAP_TEMPLATE, include_str!("../templates/fabric/fabric_configmap.yaml")),
        ];
        Self {
            sources: sources
                .into_iter()
                .map(|(name, source)| (name.to_string(), source.to_string()))
                .collect(),
        }
    }

    /// Reads every template from `dir` (e.g. `<dir>/orderer/orderer_service.yaml`)
    /// and checks that each one parses.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut sources = HashMap::new();
        for name in TEMPLATE_NAMES {
            let path = dir.join(name);
            let source = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                name: name.to_string(),
                source,
            })?;
            sources.insert(name.to_string(), source);
        }
        let registry = Self { sources };
        registry.validate()?;
        info!("Loaded {} templates from {}", registry.sources.len(), dir.display());
        Ok(registry)
    }

    /// Parses every template once so malformed YAML fails at start-up
    pub fn validate(&self) -> Result<(), TemplateError> {
        for name in self.sources.keys() {
            self.load(name)?;
        }
        Ok(())
    }
}

impl TemplateStore for TemplateRegistry {
    fn load(&self, name: &str) -> Result<serde_json::Value, TemplateError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        serde_yaml::from_str(source).map_err(|source| TemplateError::Parse {
            name: name.to_string(),
            source,
        })
    }
}
