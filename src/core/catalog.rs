//! Components shipped as `<dir>/<name>/component.yaml` files.

use crate::core::component::Component;
use crate::core::parser::load_component;
use crate::utils::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file copied into the component's image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentFile {
    pub source: String,
    pub dest: String,
}

/// A component definition loaded from a catalog directory or a
/// Checkmatefile `components` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogComponent {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub files: Vec<ComponentFile>,
    #[serde(default)]
    pub commands: IndexMap<String, String>,
    #[serde(default)]
    pub provides: Vec<Value>,
    #[serde(default)]
    pub requires: Vec<Value>,
    /// `resource_type`, `role`, `supports` and other descriptive fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogComponent {
    /// Builds a component from a schema-validated document.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn command(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(String::as_str)
    }

    /// Default port of the first provided connection point that has one.
    pub fn port(&self) -> Option<Value> {
        self.provides.iter().find_map(|point| {
            let port = point.get("port")?;
            match port {
                Value::Object(map) => map.get("default").cloned(),
                other => Some(other.clone()),
            }
        })
    }

    pub fn to_component(&self, provider: Option<&str>) -> Result<Component> {
        let mut data = serde_json::to_value(self)?;
        if let Some(map) = data.as_object_mut() {
            if self.id.is_none() {
                map.insert("id".into(), Value::String(self.name.clone()));
            }
            return Ok(Component::new(map.clone(), provider));
        }
        Ok(Component::new(Default::default(), provider))
    }
}

/// The catalog directory next to the crate manifest.
pub fn default_components_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("components")
}

/// Loads every `<components_dir>/<name>/component.yaml`, keyed by component
/// name. Directories without a component file are skipped.
pub fn get_default_catalog(components_dir: &Path) -> Result<IndexMap<String, CatalogComponent>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(components_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    entries.sort();

    let mut catalog = IndexMap::new();
    for dir in entries {
        let component_yaml = dir.join("component.yaml");
        if !component_yaml.exists() {
            debug!("No component file in {}, skipping", dir.display());
            continue;
        }
        let contents = fs::read_to_string(&component_yaml)?;
        let component = CatalogComponent::from_value(&load_component(&contents)?)?;
        if catalog.contains_key(&component.name) {
            warn!("Component '{}' defined more than once in {}", component.name, components_dir.display());
        }
        catalog.insert(component.name.clone(), component);
    }
    debug!("Loaded {} catalog component(s) from {}", catalog.len(), components_dir.display());
    Ok(catalog)
}
