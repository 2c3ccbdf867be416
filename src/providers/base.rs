use crate::core::component::Component;
use crate::core::deployment::{Deployment, SettingQuery};
use crate::utils::error::Result;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

pub const DEFAULT_DOMAIN: &str = "checkmate.local";

/// State shared by every provider: its key, catalog and the constraints the
/// environment set for it.
#[derive(Debug, Clone, Default)]
pub struct ProviderBase {
    pub key: String,
    pub catalog: Map<String, Value>,
    pub constraints: Vec<Value>,
}

impl ProviderBase {
    /// `definition` is the provider entry of an environment. Its `catalog`
    /// replaces `default_catalog` when present.
    pub fn new(key: &str, definition: &Value, default_catalog: &str) -> Result<Self> {
        let catalog = match definition.get("catalog").and_then(Value::as_object) {
            Some(catalog) => catalog.clone(),
            None => serde_yaml::from_str::<Value>(default_catalog)?
                .as_object()
                .cloned()
                .unwrap_or_default(),
        };
        let constraints = match definition.get("constraints") {
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(setting, value)| json!({"setting": setting, "value": value}))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            key: key.to_string(),
            catalog,
            constraints,
        })
    }
}

/// A deployment target. Implementations supply [`ProviderBase`]; the
/// remaining operations have working defaults.
pub trait Provider: fmt::Debug + Send + Sync {
    fn base(&self) -> &ProviderBase;

    fn key(&self) -> &str {
        &self.base().key
    }

    fn constraints(&self) -> &[Value] {
        &self.base().constraints
    }

    /// Catalog entries as components. Entries without an `id` take their
    /// catalog key.
    fn iter_components(&self) -> Vec<Component> {
        self.base()
            .catalog
            .iter()
            .map(|(id, entry)| {
                let mut data = entry.as_object().cloned().unwrap_or_default();
                data.entry("id").or_insert_with(|| Value::String(id.clone()));
                Component::new(data, Some(self.key()))
            })
            .collect()
    }

    fn find_components(&self, conditions: &Map<String, Value>) -> Vec<Component> {
        self.iter_components()
            .into_iter()
            .filter(|component| component.matches(conditions))
            .collect()
    }

    /// Components matching `conditions`, keyed by id.
    fn catalog(&self, conditions: &Map<String, Value>) -> Map<String, Value> {
        self.find_components(conditions)
            .into_iter()
            .filter_map(|component| {
                let id = component.id()?.to_string();
                Some((id, component.to_value()))
            })
            .collect()
    }

    fn get_component(&self, id: &str) -> Option<Component> {
        self.iter_components()
            .into_iter()
            .find(|component| component.id() == Some(id))
    }

    fn get_resource_name(
        &self,
        deployment: &Deployment,
        domain: &str,
        index: &str,
        service: Option<&str>,
        resource_type: &str,
    ) -> String {
        match service {
            Some(service) if deployment.constrained_to_one(service) => {
                format!("{}.{}", service, domain)
            }
            Some(service) => match index.parse::<u64>() {
                Ok(number) if index.chars().all(|c| c.is_ascii_digit()) => {
                    format!("{}{:02}.{}", service, number, domain)
                }
                _ => format!("{}{}.{}", service, index, domain),
            },
            None => format!("shared{}.{}", resource_type, domain),
        }
    }

    /// Resource templates for one instance of `definition`.
    fn generate_template(
        &self,
        deployment: &Deployment,
        resource_type: &str,
        service: Option<&str>,
        index: &str,
        _definition: &Value,
    ) -> Result<Vec<Value>> {
        debug!("Getting {} template for service {:?}", resource_type, service);
        let query = SettingQuery::new()
            .provider_key(self.key())
            .resource_type(resource_type)
            .service(service)
            .default(Value::String(DEFAULT_DOMAIN.into()));
        let domain = match deployment.get_setting("domain", &query)? {
            Some(Value::String(domain)) => domain,
            None | Some(Value::Null) => DEFAULT_DOMAIN.to_string(),
            Some(other) => other.to_string(),
        };

        let mut result = Map::new();
        result.insert("type".into(), json!(resource_type));
        result.insert("provider".into(), json!(self.key()));
        result.insert("instance".into(), json!({}));
        result.insert("desired-state".into(), json!({}));
        if let Some(service) = service {
            result.insert("service".into(), json!(service));
        }
        let name = self.get_resource_name(deployment, &domain, index, service, resource_type);
        result.insert("dns-name".into(), Value::String(name));
        Ok(vec![Value::Object(result)])
    }

    fn add_resource(&self, resource: Value, _deployment: &Deployment) -> Result<Vec<Value>> {
        Ok(vec![resource])
    }

    /// Messages describing resources that would exceed provider limits.
    fn verify_limits(&self, _resources: &[Value]) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    /// Messages describing missing permissions.
    fn verify_access(&self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}
