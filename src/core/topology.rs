use crate::core::schema::coerce_relation;
use crate::utils::error::{ChessboardError, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

/// Relations between the services of a blueprint.
///
/// Building a topology checks that every relation points at a service that
/// exists in the same blueprint.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    services: Map<String, Value>,
    /// service name -> [(remote service, interface)] in declaration order
    pub relations: IndexMap<String, Vec<(String, String)>>,
}

impl Topology {
    pub fn new(blueprint: &Value) -> Result<Self> {
        let services = blueprint
            .get("services")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut topology = Self {
            services,
            relations: IndexMap::new(),
        };
        topology.relate_services()?;
        Ok(topology)
    }

    /// Builds the topology of a parsed Checkmatefile or deployment.
    pub fn from_deployment(contents: &Value) -> Result<Self> {
        match contents.get("blueprint") {
            Some(blueprint) => Self::new(blueprint),
            None => Ok(Self::default()),
        }
    }

    pub fn services(&self) -> &Map<String, Value> {
        &self.services
    }

    fn relate_services(&mut self) -> Result<()> {
        for (service_name, service) in &self.services {
            let Some(relations) = service.get("relations").and_then(Value::as_array) else {
                continue;
            };
            if relations.is_empty() {
                continue;
            }
            let mut maps = Vec::with_capacity(relations.len());
            for relation in relations {
                let relation = coerce_relation(relation).map_err(|msg| {
                    ChessboardError::Topology(format!(
                        "Service '{}' has an invalid relation: {}",
                        service_name, msg
                    ))
                })?;
                let remote_service = relation
                    .get("service")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let remote_interface = relation
                    .get("interface")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !self.services.contains_key(remote_service) {
                    return Err(ChessboardError::Topology(format!(
                        "Service '{}' defines a relation to an unknown remote service '{}'.",
                        service_name, remote_service
                    )));
                }
                maps.push((remote_service.to_string(), remote_interface.to_string()));
            }
            self.relations.insert(service_name.clone(), maps);
        }
        Ok(())
    }

    /// Orders services so that each one comes after the services it relates
    /// to. Ties keep declaration order.
    pub fn deployment_order(&self) -> Result<Vec<String>> {
        let names: Vec<&String> = self.services.keys().collect();
        let mut pending: IndexMap<&str, usize> = names
            .iter()
            .map(|name| {
                let count = self
                    .relations
                    .get(*name)
                    .map(|targets| {
                        let mut remotes: Vec<&str> = targets
                            .iter()
                            .map(|(remote, _)| remote.as_str())
                            .filter(|remote| *remote != name.as_str())
                            .collect();
                        remotes.sort_unstable();
                        remotes.dedup();
                        remotes.len()
                    })
                    .unwrap_or(0);
                (name.as_str(), count)
            })
            .collect();

        let mut order = Vec::with_capacity(names.len());
        while !pending.is_empty() {
            let Some(ready) = pending
                .iter()
                .find(|(_, count)| **count == 0)
                .map(|(name, _)| *name)
            else {
                let remaining: Vec<&str> = pending.keys().copied().collect();
                return Err(ChessboardError::Topology(format!(
                    "Relations between services form a cycle: {}",
                    remaining.join(", ")
                )));
            };
            pending.shift_remove(ready);
            order.push(ready.to_string());

            // 依賴 ready 的服務少一個待處理的關聯
            for (dependent, targets) in &self.relations {
                if dependent == ready {
                    continue;
                }
                if targets.iter().any(|(remote, _)| remote == ready) {
                    if let Some(count) = pending.get_mut(dependent.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
        debug!("Deployment order: {}", order.join(", "));
        Ok(order)
    }
}
