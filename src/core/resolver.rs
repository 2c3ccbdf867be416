//! Planning: works out which provider components and resources a deployment
//! needs and how they connect.
//!
//! The analysis is kept per service:
//!
//! ```yaml
//! services:
//!   <service>:
//!     component:          # the resolved component definition
//!       id: ...
//!       provider: ...
//!       requires:
//!         <key>:
//!           satisfied-by: {service, component, provides-key, name}
//!       connections:
//!         <key>: {direction, service, interface, ...}
//!       instances: [<resource index>, ...]
//!     extra-components:   # components pulled in to meet requirements
//!       <requirement key>: ...
//! ```

use crate::core::component::Component;
use crate::core::deployment::{Deployment, SettingQuery};
use crate::core::environment::Environment;
use crate::core::keys::{self, KeyPair, DEFAULT_KEYPAIR, DEFAULT_KEY_BITS};
use crate::core::schema::coerce_relation;
use crate::utils::error::{ChessboardError, Result, BLUEPRINT_ERROR};
use crate::utils::helpers::{self, dict_to_yaml, PasswordOptions, ASCII_LETTERS, DIGITS};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// One end of a connection between two component definitions.
#[derive(Debug, Clone)]
struct Endpoint<'a> {
    service: &'a str,
    extra_key: Option<&'a str>,
    endpoint: Option<String>,
    endpoint_type: Option<&'static str>,
}

/// Plans `operation` on `deployment`. Only `deploy` is supported.
pub fn resolve(deployment: Deployment, operation: &str, parse_only: bool) -> Result<Deployment> {
    if operation != "deploy" {
        return Err(ChessboardError::InvalidParameter(
            "Only 'deploy' operations supported.".into(),
        ));
    }
    let mut planner = Planner::new(deployment, parse_only)?;
    planner.plan_deploy()?;
    Ok(planner.into_deployment())
}

fn text<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

fn resolve_failure(definition: &Value) -> ChessboardError {
    let message = format!("Could not resolve component '{}'", definition);
    ChessboardError::with_friendly(message.clone(), message)
}

fn as_count(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ChessboardError::Validation(format!("Invalid count: {}", value)))
}

#[derive(Debug)]
pub struct Planner {
    deployment: Deployment,
    environment: Environment,
    services: Map<String, Value>,
    parse_only: bool,
}

impl Planner {
    /// Fails with `NothingToDo` when the deployment has no blueprint or no
    /// environment.
    pub fn new(deployment: Deployment, parse_only: bool) -> Result<Self> {
        let has_blueprint = deployment
            .get("blueprint")
            .and_then(Value::as_object)
            .is_some_and(|blueprint| !blueprint.is_empty());
        if !has_blueprint {
            return Err(ChessboardError::NothingToDo(
                "Blueprint not found. Nothing to do.".into(),
            ));
        }
        let Some(environment) = deployment.environment()? else {
            return Err(ChessboardError::NothingToDo(
                "Environment not found. Nowhere to deploy to.".into(),
            ));
        };
        Ok(Self {
            deployment,
            environment,
            services: Map::new(),
            parse_only,
        })
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn into_deployment(self) -> Deployment {
        self.deployment
    }

    /// The per-service analysis.
    pub fn services(&self) -> &Map<String, Value> {
        &self.services
    }

    pub fn resources(&self) -> &Value {
        self.deployment.resources()
    }

    /// Runs the analysis and returns the planned resources.
    pub fn plan_deploy(&mut self) -> Result<&Value> {
        info!("Planning deployment '{}'", self.deployment.id());

        self.deployment.validate_options()?;
        self.deployment.validate_input_constraints()?;
        self.init_service_plans_dict();
        self.evaluate_defaults()?;
        if self.parse_only {
            self.deployment.set_keypair(DEFAULT_KEYPAIR, &KeyPair::dummy())?;
        }
        self.resolve_components()?;
        // 明確的 relation 先於 requirement
        self.resolve_relations()?;
        self.resolve_remaining_requirements()?;
        let mut history = Vec::new();
        self.resolve_recursive_requirements(&mut history)?;
        self.add_resources()?;
        self.add_byo_resources();
        self.connect_resources()?;
        self.add_static_resources()?;

        let analysis = dict_to_yaml(&Value::Object(self.services.clone()))?;
        debug!("ANALYSIS\n{}", analysis);
        debug!("RESOURCES\n{}", dict_to_yaml(self.deployment.resources())?);
        Ok(self.deployment.resources())
    }

    pub fn init_service_plans_dict(&mut self) {
        self.services = self
            .service_names()
            .into_iter()
            .map(|name| (name, json!({"component": {}})))
            .collect();
    }

    fn service_names(&self) -> Vec<String> {
        self.deployment
            .blueprint()
            .get("services")
            .and_then(Value::as_object)
            .map(|services| services.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn blueprint_service(&self, name: &str) -> Option<&Value> {
        self.deployment.blueprint().get("services")?.get(name)
    }

    /// Provider messages about resources that would exceed their limits.
    pub fn verify_limits(&self) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for (key, provider) in self.environment.providers() {
            let resources: Vec<Value> = self
                .deployment
                .resources()
                .as_object()
                .map(|resources| {
                    resources
                        .values()
                        .filter(|resource| text(resource, "provider") == Some(key.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            results.extend(provider.verify_limits(&resources)?);
        }
        Ok(results)
    }

    /// Provider messages about missing permissions.
    pub fn verify_access(&self) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for provider in self.environment.providers().values() {
            results.extend(provider.verify_access()?);
        }
        Ok(results)
    }

    /// Replaces `=generate_*` option defaults with their value so every
    /// consumer sees the same result.
    pub fn evaluate_defaults(&mut self) -> Result<()> {
        let Some(options) = self
            .deployment
            .blueprint_mut()
            .get_mut("options")
            .and_then(Value::as_object_mut)
        else {
            return Ok(());
        };
        for option in options.values_mut() {
            let Some(default) = option.get_mut("default") else {
                continue;
            };
            if default.as_str().is_some_and(|d| d.starts_with("=generate")) {
                let function = default.as_str().map(|d| d[1..].to_string()).unwrap_or_default();
                *default = helpers::evaluate(&function)?;
            }
        }
        Ok(())
    }

    fn identify_component(&self, definition: &Value) -> Result<Component> {
        self.environment
            .find_component(definition)
            .ok_or_else(|| resolve_failure(definition))
    }

    /// Resolves each service's blueprint component to a provider component.
    /// An `id` setting for the service overrides the blueprint.
    pub fn resolve_components(&mut self) -> Result<()> {
        debug!("Analyzing service components");
        for service_name in self.service_names() {
            let query = SettingQuery::new().service(service_name.as_str());
            let override_id = self.deployment.get_setting("id", &query)?;
            let mut definition = self
                .blueprint_service(&service_name)
                .and_then(|service| service.get("component"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            if let (Some(id), Some(map)) = (override_id, definition.as_object_mut()) {
                map.insert("id".into(), id);
            }
            debug!("Identifying component '{}' for service '{}'", definition, service_name);
            let component = self.identify_component(&definition).map_err(|err| {
                info!("Error resolving component: {}", err);
                err
            })?;
            debug!(
                "Component '{}' identified as '{}' for service '{}'",
                definition,
                component.id().unwrap_or_default(),
                service_name
            );
            if let Some(plan) = self.services.get_mut(&service_name) {
                plan["component"] = component.definition();
            }
        }
        Ok(())
    }

    /// Relation key: the relation's own `key`, else
    /// `<service>[#connect-from]-<target>[#connect-to]-<interface>`.
    pub fn generate_relation_key(relation: &mut Value, service: &str) -> String {
        if let Some(key) = text(relation, "key").filter(|k| !k.is_empty()) {
            return key.to_string();
        }
        let interface = text(relation, "interface").unwrap_or_default();
        let mut source = service.to_string();
        let mut target = text(relation, "service").unwrap_or_default().to_string();
        if let Some(from) = text(relation, "connect-from") {
            source = format!("{}#{}", source, from);
        }
        if let Some(to) = text(relation, "connect-to") {
            target = format!("{}#{}", target, to);
        }
        let key = format!("{}-{}-{}", source, target, interface);
        if let Some(map) = relation.as_object_mut() {
            map.insert("key".into(), Value::String(key.clone()));
        }
        key
    }

    fn is_connection_point_match(connection_point: &Value, relation: &Value) -> bool {
        connection_point.get("interface") == relation.get("interface")
    }

    /// First unsatisfied requirement of `component` matching `relation`.
    fn find_requires_key(relation: &Value, component: &Value) -> Option<String> {
        component
            .get("requires")?
            .as_object()?
            .iter()
            .find(|(_, requirement)| {
                Self::is_connection_point_match(requirement, relation)
                    && requirement.get("satisfied-by").is_none()
            })
            .map(|(key, _)| key.clone())
    }

    fn find_provides_key(relation: &Value, component: &Value) -> Option<String> {
        component
            .get("provides")?
            .as_object()?
            .iter()
            .find(|(_, provided)| Self::is_connection_point_match(provided, relation))
            .map(|(key, _)| key.clone())
    }

    /// A supported connection point matching `relation` whose `name` equals
    /// the relation's `connect-from`.
    fn find_supports_key(relation: &Value, component: &Value) -> Option<String> {
        component
            .get("supports")?
            .as_object()?
            .iter()
            .find(|(_, point)| {
                Self::is_connection_point_match(point, relation)
                    && point.get("satisfied-by").is_none()
                    && point.get("name") == relation.get("connect-from")
            })
            .map(|(key, _)| key.clone())
    }

    fn component_mut(&mut self, service: &str, extra_key: Option<&str>) -> Result<&mut Map<String, Value>> {
        let plan = self
            .services
            .get_mut(service)
            .ok_or_else(|| ChessboardError::BadState(format!("Service '{}' was not planned", service)))?;
        let definition = match extra_key {
            Some(key) => plan.get_mut("extra-components").and_then(|extras| extras.get_mut(key)),
            None => plan.get_mut("component"),
        };
        definition.and_then(Value::as_object_mut).ok_or_else(|| {
            ChessboardError::BadState(format!(
                "Component '{}' of service '{}' was not resolved",
                extra_key.unwrap_or("main"),
                service
            ))
        })
    }

    fn component(&self, service: &str, extra_key: Option<&str>) -> Option<&Value> {
        let plan = self.services.get(service)?;
        match extra_key {
            Some(key) => plan.get("extra-components")?.get(key),
            None => plan.get("component"),
        }
    }

    /// Marks `requirement_key` of the source component as satisfied by
    /// `target`.
    fn satisfy_requirement(
        &mut self,
        source: (&str, Option<&str>),
        requirement_key: &str,
        target: &Value,
        target_service: &str,
        relation_key: Option<&str>,
    ) -> Result<String> {
        let requirement = self
            .component(source.0, source.1)
            .and_then(|c| c.get("requires"))
            .and_then(|r| r.get(requirement_key))
            .cloned()
            .unwrap_or(Value::Null);
        let Some(provides_match) = Self::find_provides_key(&requirement, target) else {
            return Err(ChessboardError::Validation(format!(
                "Could not identify target for requirement '{}'",
                requirement_key
            )));
        };
        let mut info = Map::new();
        info.insert("service".into(), json!(target_service));
        info.insert("component".into(), target.get("id").cloned().unwrap_or(Value::Null));
        info.insert("provides-key".into(), json!(provides_match));
        info.insert("name".into(), json!(relation_key.unwrap_or(requirement_key)));
        if let Some(relation_key) = relation_key {
            info.insert("relation-key".into(), json!(relation_key));
        }
        let component = self.component_mut(source.0, source.1)?;
        if let Some(requirement) = component
            .get_mut("requires")
            .and_then(|r| r.get_mut(requirement_key))
            .and_then(Value::as_object_mut)
        {
            requirement.insert("satisfied-by".into(), Value::Object(info));
        }
        Ok(provides_match)
    }

    /// Writes connection info on both components: `outbound` on the source
    /// and `inbound` on the target. Existing connections are kept.
    #[allow(clippy::too_many_arguments)]
    fn connect(
        &mut self,
        source: &Endpoint<'_>,
        target: &Endpoint<'_>,
        interface: &Value,
        connection_key: &str,
        relation_type: &str,
        relation_key: Option<&str>,
        attribute: Option<&Value>,
    ) -> Result<()> {
        let connections = self
            .component_mut(source.service, source.extra_key)?
            .entry("connections")
            .or_insert_with(|| json!({}));
        if connections.get(connection_key).is_none() {
            let mut info = Map::new();
            info.insert("direction".into(), json!("outbound"));
            info.insert("service".into(), json!(target.service));
            info.insert("provides-key".into(), json!(target.endpoint));
            info.insert("interface".into(), interface.clone());
            info.insert("relation".into(), json!(relation_type));
            match source.endpoint_type {
                Some("requires") => {
                    info.insert("requires-key".into(), json!(source.endpoint));
                }
                Some("supports") => {
                    info.insert("supports-key".into(), json!(source.endpoint));
                }
                _ => {}
            }
            if let Some(relation_key) = relation_key {
                info.insert("relation-key".into(), json!(relation_key));
            }
            if let Some(extra_key) = target.extra_key {
                info.insert("extra-key".into(), json!(extra_key));
            }
            if let Some(attribute) = attribute {
                info.insert("attribute".into(), attribute.clone());
            }
            connections[connection_key] = Value::Object(info);
        }

        let connections = self
            .component_mut(target.service, target.extra_key)?
            .entry("connections")
            .or_insert_with(|| json!({}));
        if connections.get(connection_key).is_none() {
            let mut info = Map::new();
            info.insert("direction".into(), json!("inbound"));
            info.insert("service".into(), json!(source.service));
            info.insert("interface".into(), interface.clone());
            info.insert("provides-key".into(), json!(target.endpoint));
            info.insert("relation".into(), json!(relation_type));
            if let Some(relation_key) = relation_key {
                info.insert("relation-key".into(), json!(relation_key));
            }
            if let Some(extra_key) = source.extra_key {
                info.insert("extra-key".into(), json!(extra_key));
            }
            connections[connection_key] = Value::Object(info);
        }
        Ok(())
    }

    /// Matches every blueprint relation to a requirement (or supported
    /// connection point) on the source and a provided interface on the
    /// target, and connects them.
    pub fn resolve_relations(&mut self) -> Result<()> {
        debug!("Analyzing relations");
        let deployment_id = self.deployment.id().to_string();
        let service_names = self.service_names();
        for service_name in &service_names {
            let Some(raw) = self
                .blueprint_service(service_name)
                .and_then(|service| service.get("relations"))
                .and_then(Value::as_array)
                .cloned()
            else {
                continue;
            };
            let mut relations = Vec::with_capacity(raw.len());
            let mut relation_keys = HashSet::new();
            for entry in &raw {
                let mut relation = coerce_relation(entry).map_err(|msg| {
                    ChessboardError::Validation(format!(
                        "Service '{}' has an invalid relation: {}",
                        service_name, msg
                    ))
                })?;
                let rel_key = Self::generate_relation_key(&mut relation, service_name);
                if !relation_keys.insert(rel_key.clone()) {
                    return Err(ChessboardError::Validation(format!(
                        "Duplicate relations detected: {}",
                        rel_key
                    )));
                }
                let target_service = text(&relation, "service").unwrap_or_default().to_string();
                if !service_names.contains(&target_service) {
                    let message = format!(
                        "Cannot find service '{}' for '{}' to connect to in deployment {}",
                        target_service, service_name, deployment_id
                    );
                    info!("{}", message);
                    return Err(ChessboardError::Validation(message));
                }
                self.resolve_relation(service_name, &target_service, &relation, &rel_key)?;
                relations.push(relation);
            }
            // 寫回標準化後的 relation 以便 get_setting 依 key 查找
            if let Some(service) = self
                .deployment
                .blueprint_mut()
                .get_mut("services")
                .and_then(|services| services.get_mut(service_name.as_str()))
                .and_then(Value::as_object_mut)
            {
                service.insert("relations".into(), Value::Array(relations));
            }
        }
        debug!("All relations successfully matched with target services");
        Ok(())
    }

    fn resolve_relation(
        &mut self,
        service_name: &str,
        target_service: &str,
        relation: &Value,
        rel_key: &str,
    ) -> Result<()> {
        let source = self.component(service_name, None).cloned().unwrap_or(Value::Null);
        let target = self.component(target_service, None).cloned().unwrap_or(Value::Null);

        let (endpoint, endpoint_type, provides_match) = match Self::find_requires_key(relation, &source) {
            Some(requires_match) => {
                debug!("  Matched relation '{}' to requirement '{}'", rel_key, requires_match);
                let provides_match = self.satisfy_requirement(
                    (service_name, None),
                    &requires_match,
                    &target,
                    target_service,
                    Some(rel_key),
                )?;
                if let Some(attribute) = relation.get("attribute") {
                    warn!("Using v0.2 feature");
                    if let Some(satisfied) = self
                        .component_mut(service_name, None)?
                        .get_mut("requires")
                        .and_then(|r| r.get_mut(requires_match.as_str()))
                        .and_then(|r| r.get_mut("satisfied-by"))
                        .and_then(Value::as_object_mut)
                    {
                        satisfied.insert("attribute".into(), attribute.clone());
                    }
                }
                (requires_match, "requires", Some(provides_match))
            }
            None => {
                let Some(supports_match) = Self::find_supports_key(relation, &source) else {
                    return Err(ChessboardError::Validation(format!(
                        "Could not identify valid connection point for relation '{}'",
                        rel_key
                    )));
                };
                debug!("  Matched relation '{}' to supported '{}'", rel_key, supports_match);
                (supports_match, "supports", Self::find_provides_key(relation, &target))
            }
        };

        let source_end = Endpoint {
            service: service_name,
            extra_key: None,
            endpoint: Some(endpoint),
            endpoint_type: Some(endpoint_type),
        };
        let target_end = Endpoint {
            service: target_service,
            extra_key: None,
            endpoint: provides_match,
            endpoint_type: None,
        };
        let relation_type = text(relation, "relation").unwrap_or("reference");
        self.connect(
            &source_end,
            &target_end,
            relation.get("interface").unwrap_or(&Value::Null),
            rel_key,
            relation_type,
            Some(rel_key),
            relation.get("attribute"),
        )
    }

    /// Loads components for requirements no relation satisfied. They are
    /// kept under the service's `extra-components` by requirement key.
    pub fn resolve_remaining_requirements(&mut self) -> Result<()> {
        debug!("Analyzing requirements");
        for service_name in self.service_names() {
            self.resolve_remaining_service_requirements(&service_name)?;
        }
        Ok(())
    }

    fn resolve_remaining_service_requirements(&mut self, service_name: &str) -> Result<()> {
        let Some(requirements) = self
            .component(service_name, None)
            .and_then(|c| c.get("requires"))
            .and_then(Value::as_object)
            .cloned()
        else {
            return Ok(());
        };
        for (key, requirement) in requirements {
            if requirement.get("satisfied-by").is_some() {
                continue;
            }
            let mut definition = requirement.clone();
            let relation = definition
                .as_object_mut()
                .and_then(|d| d.remove("relation"))
                .and_then(|r| r.as_str().map(str::to_string))
                .unwrap_or_else(|| "reference".to_string());

            debug!(
                "Identifying component '{}' to satisfy requirement '{}' in service '{}'",
                definition, key, service_name
            );
            let component = self.identify_component(&definition)?.definition();

            let plan = self.services.get_mut(service_name).and_then(Value::as_object_mut);
            if let Some(plan) = plan {
                let extras = plan.entry("extra-components").or_insert_with(|| json!({}));
                extras[key.as_str()] = component.clone();
            }
            if relation == "host" {
                let main = self.component_mut(service_name, None)?;
                let host_keys = main.entry("host-keys").or_insert_with(|| json!([]));
                if let Some(list) = host_keys.as_array_mut() {
                    list.push(json!(key));
                }
            }

            self.satisfy_requirement((service_name, None), &key, &component, service_name, None)?;
            let provides_match = Self::find_provides_key(&requirement, &component);
            let source = Endpoint {
                service: service_name,
                extra_key: None,
                endpoint: Some(key.clone()),
                endpoint_type: Some("requires"),
            };
            let target = Endpoint {
                service: service_name,
                extra_key: Some(key.as_str()),
                endpoint: provides_match,
                endpoint_type: None,
            };
            self.connect(
                &source,
                &target,
                requirement.get("interface").unwrap_or(&Value::Null),
                &key,
                &relation,
                None,
                None,
            )?;
        }
        Ok(())
    }

    /// Resolves requirements of extra components until none remain. A
    /// component met twice for the same service is a dependency loop.
    pub fn resolve_recursive_requirements(&mut self, history: &mut Vec<(String, String)>) -> Result<()> {
        debug!("Analyzing additional requirements");
        let mut stack = Vec::new();
        for (service_name, plan) in &self.services {
            let Some(extras) = plan.get("extra-components").and_then(Value::as_object) else {
                continue;
            };
            for (component_key, component) in extras {
                let Some(requirements) = component.get("requires").and_then(Value::as_object) else {
                    continue;
                };
                for (key, requirement) in requirements {
                    if requirement.get("satisfied-by").is_none() {
                        stack.push((service_name.clone(), component_key.clone(), key.clone()));
                    }
                }
            }
        }

        for (service_name, component_key, requirement_key) in &stack {
            let requirement = self
                .component(service_name, Some(component_key.as_str()))
                .and_then(|c| c.get("requires"))
                .and_then(|r| r.get(requirement_key))
                .cloned()
                .unwrap_or(Value::Null);
            let mut definition = requirement.clone();
            let relation = definition
                .as_object_mut()
                .and_then(|d| d.remove("relation"))
                .and_then(|r| r.as_str().map(str::to_string))
                .unwrap_or_else(|| "reference".to_string());

            let found = self.identify_component(&definition)?;
            let found_id = found.id().unwrap_or_default().to_string();
            debug!(
                "Component '{}' identified as '{}' to satisfy requirement '{}' in service '{}' for extra component '{}'",
                definition, found_id, requirement_key, service_name, component_key
            );

            let signature = (service_name.clone(), found_id.clone());
            if history.contains(&signature) {
                let message = format!(
                    "Dependency loop detected while resolving requirements for service '{}'. The component '{}' has been encountered already",
                    service_name, found_id
                );
                return Err(ChessboardError::with_friendly(message.clone(), message));
            }
            history.push(signature);

            let found = found.definition();
            if let Some(plan) = self.services.get_mut(service_name.as_str()) {
                plan["extra-components"][requirement_key.as_str()] = found.clone();
            }
            let provides_key = self.satisfy_requirement(
                (service_name.as_str(), Some(component_key.as_str())),
                requirement_key,
                &found,
                service_name,
                None,
            )?;
            let source = Endpoint {
                service: service_name,
                extra_key: Some(component_key.as_str()),
                endpoint: Some(requirement_key.clone()),
                endpoint_type: Some("requires"),
            };
            let target = Endpoint {
                service: service_name,
                extra_key: Some(requirement_key.as_str()),
                endpoint: Some(provides_key),
                endpoint_type: None,
            };
            self.connect(
                &source,
                &target,
                requirement.get("interface").unwrap_or(&Value::Null),
                requirement_key,
                &relation,
                None,
                None,
            )?;
        }
        if !stack.is_empty() {
            self.resolve_recursive_requirements(history)?;
        }
        Ok(())
    }

    fn next_resource_index(&self) -> String {
        self.deployment
            .resources()
            .as_object()
            .map(|resources| {
                resources
                    .keys()
                    .filter(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()))
                    .count()
            })
            .unwrap_or(0)
            .to_string()
    }

    /// Adds `count` resources per service. Database replicas come after
    /// everything else.
    pub fn add_resources(&mut self) -> Result<()> {
        debug!("Add resources");
        let (post, pre): (Vec<String>, Vec<String>) = self.service_names().into_iter().partition(|name| {
            self.blueprint_service(name)
                .and_then(|service| service.get("component"))
                .and_then(|component| text(component, "type"))
                == Some("database-replica")
        });
        for service_name in pre.iter().chain(post.iter()) {
            debug!("  For service '{}'", service_name);
            let definition = self.component(service_name, None).cloned().unwrap_or(Value::Null);
            let provider_key = text(&definition, "provider").unwrap_or_default();
            let component_id = text(&definition, "id").unwrap_or_default();
            let provider = self.environment.get_provider(provider_key)?;
            let resource_type = provider
                .get_component(component_id)
                .and_then(|component| component.resource_type().map(str::to_string));
            let query = SettingQuery::new()
                .provider_key(provider_key)
                .resource_type(resource_type.as_deref())
                .service(service_name.as_str())
                .default(json!(1));
            let count = match self.deployment.get_setting("count", &query)? {
                Some(value) => as_count(&value)?,
                None => 1,
            };
            for service_index in 1..=count {
                self.add_resource_for_service(service_name, service_index)?;
            }
        }
        Ok(())
    }

    /// Adds the resources of one instance of a service, including the
    /// extra components it needs, and connects it to its hosts.
    pub fn add_resource_for_service(&mut self, service_name: &str, service_index: u64) -> Result<()> {
        debug!("  For service '{}'", service_name);
        let index = service_index.to_string();
        let definition = self.component(service_name, None).cloned().unwrap_or(Value::Null);
        let definition_id = definition.get("id").cloned();
        let resources = self.deployment.create_resource_template(
            &index,
            &definition,
            Some(service_name),
            &self.environment,
        )?;
        for mut resource in resources {
            resource["status"] = json!("PLANNED");
            if resource.get("component") != definition_id.as_ref() {
                // 供應者額外提供的資源
                self.add_resource(resource, None)?;
                continue;
            }
            let resource_index = self.add_resource(resource, Some((service_name, None)))?;

            let extra_keys: Vec<String> = self
                .services
                .get(service_name)
                .and_then(|plan| plan.get("extra-components"))
                .and_then(Value::as_object)
                .map(|extras| extras.keys().cloned().collect())
                .unwrap_or_default();
            for key in extra_keys {
                let extra_def = self.component(service_name, Some(key.as_str())).cloned().unwrap_or(Value::Null);
                debug!("    Processing extra component '{}' for '{}'", key, service_name);
                let extra_resources = self.deployment.create_resource_template(
                    &index,
                    &extra_def,
                    Some(service_name),
                    &self.environment,
                )?;
                for extra_resource in extra_resources {
                    if extra_resource.get("component") != extra_def.get("id") {
                        self.add_resource(extra_resource, None)?;
                        continue;
                    }
                    let extra_index = self.add_resource(extra_resource, Some((service_name, Some(key.as_str()))))?;

                    let main = self.component(service_name, None).cloned().unwrap_or(Value::Null);
                    let is_host = main
                        .get("host-keys")
                        .and_then(Value::as_array)
                        .is_some_and(|keys| keys.iter().any(|k| k.as_str() == Some(key.as_str())));
                    if !is_host {
                        continue;
                    }
                    let Some(connection) = main.get("connections").and_then(|c| c.get(key.as_str())) else {
                        continue;
                    };
                    if text(connection, "relation") == Some("reference")
                        || text(connection, "direction") == Some("inbound")
                    {
                        continue;
                    }
                    self.connect_instances(&resource_index, &extra_index, connection, &key)?;
                }
            }
        }
        Ok(())
    }

    /// Stores a resource under its index (the next free numeric index when
    /// the provider did not set one) and records it on the definition.
    fn add_resource(&mut self, mut resource: Value, definition: Option<(&str, Option<&str>)>) -> Result<String> {
        let index = match resource.get("index").and_then(Value::as_str).filter(|i| !i.is_empty()) {
            Some(index) => index.to_string(),
            None => {
                let index = self.next_resource_index();
                resource["index"] = json!(index);
                index
            }
        };
        debug!(
            "  Adding a '{}' resource with resource key '{}'",
            text(&resource, "type").unwrap_or_default(),
            index
        );
        self.deployment.resources_mut().insert(index.clone(), resource);
        if let Some((service, extra_key)) = definition {
            let instances = self
                .component_mut(service, extra_key)?
                .entry("instances")
                .or_insert_with(|| json!([]));
            if let Some(list) = instances.as_array_mut() {
                list.push(json!(index));
            }
        }
        Ok(index)
    }

    /// Adds resources listed under `inputs.resources` (bring your own).
    pub fn add_byo_resources(&mut self) {
        let byo = self
            .deployment
            .inputs()
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for mut resource in byo {
            let index = self.next_resource_index();
            if let Some(map) = resource.as_object_mut() {
                map.insert("index".into(), json!(index));
            }
            self.deployment.resources_mut().insert(index, resource);
        }
    }

    /// Writes `relations` on every planned resource from its definition's
    /// connections.
    pub fn connect_resources(&mut self) -> Result<()> {
        debug!("Connect resources");
        let mut definitions = Vec::new();
        for plan in self.services.values() {
            if let Some(component) = plan.get("component") {
                definitions.push(component.clone());
            }
            if let Some(extras) = plan.get("extra-components").and_then(Value::as_object) {
                definitions.extend(extras.values().cloned());
            }
        }
        for definition in definitions {
            let instances: Vec<String> = definition
                .get("instances")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            for index in instances {
                self.connect_resource(&index, &definition)?;
            }
        }
        Ok(())
    }

    fn connect_resource(&mut self, resource_index: &str, definition: &Value) -> Result<()> {
        let Some(connections) = definition.get("connections").and_then(Value::as_object) else {
            return Ok(());
        };
        for (key, connection) in connections {
            if let Some(from) = text(connection, "outbound-from") {
                if from != resource_index {
                    continue;
                }
            }
            let is_host = text(connection, "relation") == Some("host");
            if is_host && text(connection, "direction") == Some("inbound") {
                continue;
            }
            let resource = self.deployment.resources().get(resource_index).cloned().unwrap_or(Value::Null);
            let target_service = text(connection, "service").unwrap_or_default();
            let target_def = self
                .component(target_service, text(connection, "extra-key"))
                .cloned()
                .unwrap_or(Value::Null);
            let outbound_from = text(&resource, "service")
                .and_then(|service| target_def.get("connections")?.get(service)?.get("outbound-from"))
                .cloned();
            let instances: Vec<String> = if let Some(from) = outbound_from {
                match from {
                    Value::Array(list) => list.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
                    Value::String(index) => vec![index],
                    _ => Vec::new(),
                }
            } else if is_host {
                // 只連到所在的主機
                match text(&resource, "hosted_on") {
                    Some(host) => vec![host.to_string()],
                    None => return Ok(()),
                }
            } else {
                target_def
                    .get("instances")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
                    .unwrap_or_default()
            };
            for target_index in instances {
                self.connect_instances(resource_index, &target_index, connection, key)?;
            }
        }
        Ok(())
    }

    /// Writes a relation from one resource to another. Host relations also
    /// set `hosted_on` on the resource and `hosts` on the target.
    pub fn connect_instances(
        &mut self,
        resource_index: &str,
        target_index: &str,
        connection: &Value,
        connection_key: &str,
    ) -> Result<()> {
        let resources = self.deployment.resources();
        let resource = resources.get(resource_index).cloned().unwrap_or(Value::Null);
        let target = resources.get(target_index).cloned().unwrap_or(Value::Null);

        let relation_type = text(connection, "relation").unwrap_or("reference");
        let write_key = if relation_type == "host" {
            "host".to_string()
        } else {
            format!("{}-{}", connection_key, target_index)
        };
        let mut result = Map::new();
        result.insert("interface".into(), connection.get("interface").cloned().unwrap_or(Value::Null));
        result.insert("state".into(), json!("planned"));
        result.insert("name".into(), json!(connection_key));
        result.insert("relation".into(), json!(relation_type));
        match text(connection, "direction") {
            Some("inbound") => {
                result.insert("source".into(), json!(target_index));
                result.insert(
                    "provides-key".into(),
                    connection.get("provides-key").cloned().unwrap_or(Value::Null),
                );
            }
            Some("outbound") => {
                result.insert("target".into(), json!(target_index));
                for key in ["requires-key", "supports-key"] {
                    if let Some(value) = connection.get(key) {
                        result.insert(key.into(), value.clone());
                    }
                }
            }
            _ => {}
        }
        if let Some(attribute) = connection.get("attribute") {
            warn!("Using v0.2 feature");
            result.insert("attribute".into(), attribute.clone());
        }
        if let Some(relation_key) = connection.get("relation-key") {
            result.insert("relation-key".into(), relation_key.clone());
        }
        let result = Value::Object(result);

        if let Some(existing) = resource.get("relations").and_then(|r| r.get(&write_key)) {
            if *existing == result {
                debug!("Relation '{}' already exists", write_key);
                return Ok(());
            }
            return Err(ChessboardError::Validation(format!(
                "Conflicting relation named '{}' exists in service '{}'.",
                write_key,
                text(&target, "service").unwrap_or_default()
            )));
        }

        if relation_type == "host" {
            if let Some(host) = text(&resource, "hosted_on").filter(|host| *host != target_index) {
                return Err(ChessboardError::with_friendly(
                    format!(
                        "Resource '{}' is already set to be hosted on '{}'. Cannot change host to '{}'",
                        resource_index, host, target_index
                    ),
                    BLUEPRINT_ERROR,
                ));
            }
            if let Some(target) = self.deployment.resources_mut().get_mut(target_index) {
                let hosts = target
                    .as_object_mut()
                    .map(|t| t.entry("hosts").or_insert_with(|| json!([])));
                if let Some(Value::Array(hosts)) = hosts {
                    if !hosts.iter().any(|h| h.as_str() == Some(resource_index)) {
                        hosts.push(json!(resource_index));
                    }
                }
            }
        }

        if let Some(resource) = self
            .deployment
            .resources_mut()
            .get_mut(resource_index)
            .and_then(Value::as_object_mut)
        {
            if relation_type == "host" {
                resource.insert("hosted_on".into(), json!(target_index));
            }
            let relations = resource.entry("relations").or_insert_with(|| json!({}));
            relations[write_key.as_str()] = result;
        }
        Ok(())
    }

    /// Adds the blueprint's static resources. Without a provider component
    /// users and key pairs are generated locally.
    pub fn add_static_resources(&mut self) -> Result<()> {
        debug!("Prepare static resources");
        let Some(statics) = self
            .deployment
            .blueprint()
            .get("resources")
            .and_then(Value::as_object)
            .cloned()
        else {
            return Ok(());
        };
        for (key, resource) in statics {
            let resource_type = text(&resource, "type").unwrap_or_default().to_string();
            let mut result = match self.environment.find_component(&resource) {
                Some(component) => {
                    let provider = self
                        .environment
                        .get_provider(component.provider_key().unwrap_or_default())?;
                    let results =
                        provider.generate_template(&self.deployment, &resource_type, None, "1", &Value::Null)?;
                    let mut last = results.into_iter().last().unwrap_or_else(|| json!({}));
                    last["component"] = json!(component.id());
                    last
                }
                None => match resource_type.as_str() {
                    "user" => json!({"type": "user", "instance": self.static_user(&key, &resource)?}),
                    "key-pair" => {
                        let instance = match resource.get("instance") {
                            Some(instance) => instance.clone(),
                            None => self.static_key_pair(&resource)?,
                        };
                        json!({"type": "key-pair", "instance": instance})
                    }
                    _ => {
                        let message = format!("Could not find provider for the '{}' resource", key);
                        return Err(ChessboardError::with_friendly(message.clone(), message));
                    }
                },
            };
            result["index"] = json!(key);
            debug!("  Adding a {} resource with resource key {}", resource_type, key);
            self.deployment.resources_mut().insert(key.clone(), result);
        }
        Ok(())
    }

    fn static_user(&self, key: &str, resource: &Value) -> Result<Value> {
        let name = match resource.get("name") {
            Some(name) => name.clone(),
            None => {
                let name = self
                    .deployment
                    .get_setting_by_resource_path(&format!("resources/{}/name", key), Some(json!("admin")))?
                    .unwrap_or(Value::Null);
                if !crate::core::functions::is_truthy(&name) {
                    let message = format!("Name must be specified for the '{}' user resource", key);
                    return Err(ChessboardError::with_friendly(message.clone(), message));
                }
                name
            }
        };
        let password = match resource.get("password") {
            Some(password) => password.clone(),
            None => {
                let supplied = self
                    .deployment
                    .get_setting_by_resource_path(&format!("resources/{}/password", key), None)?
                    .filter(crate::core::functions::is_truthy);
                match supplied {
                    Some(password) => password,
                    None => {
                        let options = PasswordOptions {
                            starts_with: Some(ASCII_LETTERS.to_string()),
                            valid_chars: Some(format!("{}{}", ASCII_LETTERS, DIGITS)),
                            ..PasswordOptions::default()
                        };
                        json!(helpers::generate_password(&options)?)
                    }
                }
            }
        };
        Ok(json!({"name": name, "password": password}))
    }

    fn static_key_pair(&self, resource: &Value) -> Result<Value> {
        match text(resource, "private_key") {
            None => {
                let pair = if self.parse_only {
                    KeyPair::dummy()
                } else {
                    keys::generate_key_pair(DEFAULT_KEY_BITS)?
                };
                Ok(json!({
                    "public_key": pair.public_key,
                    "public_key_ssh": pair.public_key_ssh,
                    "private_key": pair.private_key,
                }))
            }
            Some(private_key) => {
                let public_key = match resource.get("public_key") {
                    Some(public_key) => public_key.clone(),
                    None => json!(keys::get_public_key(private_key)?),
                };
                let public_key_ssh = match resource.get("public_key_ssh") {
                    Some(public_key_ssh) => public_key_ssh.clone(),
                    None => json!(keys::get_ssh_public_key(private_key)?),
                };
                Ok(json!({
                    "private_key": private_key,
                    "public_key": public_key,
                    "public_key_ssh": public_key_ssh,
                }))
            }
        }
    }
}
