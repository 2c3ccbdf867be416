use crate::core::component::Component;
use crate::providers::{self, Provider};
use crate::utils::error::{ChessboardError, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Where a deployment is launched: the providers it may use.
#[derive(Debug, Default)]
pub struct Environment {
    definition: Map<String, Value>,
    providers: IndexMap<String, Box<dyn Provider>>,
}

impl Environment {
    pub fn new(definition: &Value) -> Result<Self> {
        let definition = definition.as_object().cloned().unwrap_or_default();
        let mut providers = IndexMap::new();
        if let Some(entries) = definition.get("providers").and_then(Value::as_object) {
            for (key, entry) in entries {
                providers.insert(key.clone(), providers::get_provider(key, entry)?);
            }
        }
        Ok(Self {
            definition,
            providers,
        })
    }

    /// Environment of a deployment or Checkmatefile. `None` when it has none.
    pub fn from_deployment(deployment: &Value) -> Result<Option<Self>> {
        match deployment.get("environment") {
            Some(environment) if environment.is_object() => Self::new(environment).map(Some),
            _ => Ok(None),
        }
    }

    pub fn definition(&self) -> &Map<String, Value> {
        &self.definition
    }

    pub fn providers(&self) -> &IndexMap<String, Box<dyn Provider>> {
        &self.providers
    }

    pub fn get_provider(&self, key: &str) -> Result<&dyn Provider> {
        self.providers
            .get(key)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| {
                ChessboardError::DoesNotExist(format!(
                    "Provider '{}' is not defined in the environment",
                    key
                ))
            })
    }

    /// Components of every provider matching a blueprint selector such as
    /// `{type: application, name: wordpress}` or `{id: component_id}`.
    pub fn find_components(&self, selector: &Value) -> Vec<Component> {
        let mut conditions = selector.as_object().cloned().unwrap_or_default();
        // type 即 resource_type
        let resource_type = match conditions.remove("type") {
            Some(resource_type) => resource_type,
            None => conditions.get("resource_type").cloned().unwrap_or(Value::Null),
        };
        conditions.insert("resource_type".into(), resource_type);

        self.providers
            .values()
            .flat_map(|provider| provider.find_components(&conditions))
            .collect()
    }

    /// The first component matching `selector`.
    pub fn find_component(&self, selector: &Value) -> Option<Component> {
        let mut matches = self.find_components(selector);
        if matches.is_empty() {
            info!("Did not find component match for: {}", selector);
            return None;
        }
        if matches.len() > 1 {
            let ids: Vec<&str> = matches.iter().filter_map(Component::id).collect();
            warn!("Ambiguous component '{}' matches: {:?}", selector, ids);
            warn!(
                "Will use '{}.{}' as a default if no match is found",
                matches[0].provider_key().unwrap_or_default(),
                matches[0].id().unwrap_or_default()
            );
        }
        Some(matches.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn environment() -> Environment {
        Environment::new(&json!({
            "name": "local",
            "providers": {
                "docker": {"constraints": [{"name": "Hi"}]},
                "keys": {},
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_from_deployment() {
        assert!(Environment::from_deployment(&json!({})).unwrap().is_none());
        let env = Environment::from_deployment(&json!({"environment": {"providers": {"docker": {}}}}))
            .unwrap()
            .unwrap();
        assert_eq!(env.providers().len(), 1);
    }

    #[test]
    fn test_get_provider() {
        let env = environment();
        assert_eq!(env.get_provider("docker").unwrap().key(), "docker");
        assert_eq!(env.get_provider("docker").unwrap().constraints().len(), 1);
        assert!(env.get_provider("rackspace").is_err());
    }

    #[test]
    fn test_find_components_normalizes_type() {
        let env = environment();
        let found = env.find_components(&json!({"type": "database"}));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some("docker_mysql"));

        let found = env.find_component(&json!({"resource_type": "key-pair"})).unwrap();
        assert_eq!(found.id(), Some("core_key_pair"));
        assert_eq!(found.provider_key(), Some("keys"));
    }

    #[test]
    fn test_find_component_no_match() {
        assert!(environment().find_component(&json!({"type": "user"})).is_none());
    }

    #[test]
    fn test_find_component_ambiguous() {
        let found = environment().find_component(&json!({"id": "*"})).unwrap();
        assert_eq!(found.id(), Some("docker_generic"));
    }
}
