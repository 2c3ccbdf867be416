//! A deployment: a Checkmatefile plus the inputs, resources and status that
//! planning adds to it.

use crate::core::constraints::Constraint;
use crate::core::environment::Environment;
use crate::core::functions::{self, FunctionContext};
use crate::core::inputs::Input;
use crate::core::keys::KeyPair;
use crate::core::topology::Topology;
use crate::utils::error::{ChessboardError, Result, BLUEPRINT_ERROR};
use crate::utils::helpers::{self, generate_id, read_path};
use serde_json::{json, Map, Value};
use tracing::debug;

static NULL: Value = Value::Null;

/// Where a setting is being looked up. Every field narrows the lookup; unset
/// fields match anything that does not require them.
#[derive(Debug, Clone, Default)]
pub struct SettingQuery<'a> {
    pub resource_type: Option<&'a str>,
    pub service: Option<&'a str>,
    pub provider_key: Option<&'a str>,
    pub relation: Option<&'a str>,
    pub default: Option<Value>,
}

impl<'a> SettingQuery<'a> {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    pub fn resource_type(mut self, resource_type: impl Into<Option<&'a str>>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn service(mut self, service: impl Into<Option<&'a str>>) -> Self {
        self.service = service.into();
        self
    }

    pub fn provider_key(mut self, provider_key: impl Into<Option<&'a str>>) -> Self {
        self.provider_key = provider_key.into();
        self
    }

    pub fn relation(mut self, relation: impl Into<Option<&'a str>>) -> Self {
        self.relation = relation.into();
        self
    }

    pub fn default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

fn present<'v>(value: Option<&'v Value>) -> Option<&'v Value> {
    value.filter(|v| !v.is_null())
}

fn python_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    data: Value,
}

impl Deployment {
    pub fn new(data: Value) -> Self {
        let data = if data.is_object() { data } else { json!({}) };
        Self { data }
    }

    /// Copies a parsed Checkmatefile, adding a generated `id` and a `NEW`
    /// status when they are missing.
    pub fn from_checkmate_file(contents: &Value) -> Self {
        let mut deployment = Self::new(contents.clone());
        if let Some(map) = deployment.data.as_object_mut() {
            map.entry("id").or_insert_with(|| Value::String(generate_id()));
            map.entry("status").or_insert_with(|| Value::String("NEW".into()));
        }
        deployment
    }

    pub fn id(&self) -> &str {
        self.data.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_value(self) -> Value {
        self.data
    }

    pub fn blueprint(&self) -> &Value {
        self.data.get("blueprint").unwrap_or(&NULL)
    }

    pub fn inputs(&self) -> &Value {
        self.data.get("inputs").unwrap_or(&NULL)
    }

    pub fn resources(&self) -> &Value {
        self.data.get("resources").unwrap_or(&NULL)
    }

    fn map_mut(&mut self) -> &mut Map<String, Value> {
        if !self.data.is_object() {
            self.data = json!({});
        }
        match self.data.as_object_mut() {
            Some(map) => map,
            None => unreachable!("deployment data is always a mapping"),
        }
    }

    fn section_mut(&mut self, key: &str) -> &mut Map<String, Value> {
        let entry = self
            .map_mut()
            .entry(key.to_string())
            .or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        match entry.as_object_mut() {
            Some(map) => map,
            None => unreachable!("section was just replaced by a mapping"),
        }
    }

    pub fn resources_mut(&mut self) -> &mut Map<String, Value> {
        self.section_mut("resources")
    }

    pub fn blueprint_mut(&mut self) -> &mut Map<String, Value> {
        self.section_mut("blueprint")
    }

    pub fn set_status(&mut self, status: &str) {
        self.map_mut()
            .insert("status".into(), Value::String(status.to_string()));
    }

    /// Stores a key pair under `keys/<name>` so templates can read it with
    /// `setting('keys/<name>/public_key')`.
    pub fn set_keypair(&mut self, name: &str, pair: &KeyPair) -> Result<()> {
        let value = serde_json::to_value(pair)?;
        self.section_mut("keys").insert(name.to_string(), value);
        Ok(())
    }

    pub fn topology(&self) -> Result<Topology> {
        Topology::from_deployment(&self.data)
    }

    pub fn environment(&self) -> Result<Option<Environment>> {
        Environment::from_deployment(&self.data)
    }

    /// Function sources of the deployment with `setting()` resolving through
    /// [`Deployment::get_setting`].
    pub fn function_context(&self) -> FunctionContext<'_> {
        FunctionContext::from_document(&self.data)
            .with("deployment", &self.data)
            .with_settings(Box::new(move |name| {
                Ok(self
                    .get_setting(name, &SettingQuery::new())?
                    .unwrap_or(Value::Null))
            }))
    }

    fn evaluation_context(&self) -> FunctionContext<'_> {
        let blueprint = self.blueprint();
        FunctionContext::new()
            .with("options", blueprint.get("options").unwrap_or(&NULL))
            .with("services", blueprint.get("services").unwrap_or(&NULL))
            .with("resources", self.resources())
            .with("inputs", self.inputs())
    }

    fn options(&self) -> Option<&Map<String, Value>> {
        self.blueprint().get("options").and_then(Value::as_object)
    }

    /// Checks that required options are supplied and url options carry
    /// consistent certificate data.
    pub fn validate_options(&self) -> Result<()> {
        let Some(options) = self.options() else {
            return Ok(());
        };
        for (key, option) in options {
            self.check_option_required(key, option)?;
            self.check_option_url(key, option)?;
        }
        Ok(())
    }

    pub fn check_option_url(&self, key: &str, option: &Value) -> Result<()> {
        if option.get("type").and_then(Value::as_str) != Some("url") {
            return Ok(());
        }
        let Some(value) = read_path(self.inputs(), "blueprint").and_then(|bp| bp.get(key)) else {
            return Ok(());
        };
        let Some(value) = value.as_object() else {
            return Ok(());
        };
        let has = |field: &str| value.contains_key(field);
        if has("private_key") && !has("certificate") {
            return Err(ChessboardError::Validation(format!(
                "If a private key is supplied for '{}', then a certificate is also required",
                key
            )));
        }
        if has("certificate") && !has("private_key") {
            return Err(ChessboardError::Validation(format!(
                "If a certificate is supplied for '{}', then a private key is also required",
                key
            )));
        }
        if has("intermediate_key") && !(has("private_key") && has("certificate")) {
            return Err(ChessboardError::Validation(format!(
                "If an intermediate key is supplied for '{}', then a certificate and private key are also required",
                key
            )));
        }
        Ok(())
    }

    pub fn check_option_required(&self, key: &str, option: &Value) -> Result<()> {
        if option.get("default").is_some() {
            return Ok(());
        }
        let Some(required) = option.get("required") else {
            return Ok(());
        };
        let required = if required.is_object() {
            functions::evaluate(required, &self.evaluation_context())?
        } else {
            required.clone()
        };
        let supplied = read_path(self.inputs(), "blueprint")
            .and_then(|bp| bp.get(key))
            .is_some();
        if functions::is_truthy(&required) && !supplied {
            return Err(ChessboardError::Validation(format!(
                "Required blueprint input '{}' not supplied",
                key
            )));
        }
        Ok(())
    }

    /// Tests each supplied (or default) option value against the option's
    /// constraints.
    pub fn validate_input_constraints(&self) -> Result<()> {
        let Some(options) = self.options() else {
            return Ok(());
        };
        let context = self.evaluation_context();
        for (key, option) in options {
            let Some(constraints) = option.get("constraints").and_then(Value::as_array) else {
                continue;
            };
            if constraints.is_empty() {
                continue;
            }
            let mut value = read_path(self.inputs(), "blueprint")
                .and_then(|bp| bp.get(key))
                .or_else(|| option.get("default"))
                .cloned()
                .unwrap_or(Value::Null);
            if helpers::is_evaluable(&value) {
                value = functions::eval_blueprint_fxn(&value)?;
            }
            if value.is_null() {
                continue;
            }
            for entry in constraints {
                let constraint = Constraint::from_constraint(entry, &context)?;
                if !constraint.test(&value) {
                    let shown = if option.get("type").and_then(Value::as_str) == Some("password") {
                        "*******".to_string()
                    } else {
                        Input::new(&value).to_string()
                    };
                    return Err(ChessboardError::Validation(format!(
                        "The input for option '{}' did not pass validation. The value was '{}'. The validation rule was {}",
                        key, shown, constraint.message
                    )));
                }
            }
        }
        Ok(())
    }

    /// Finds the value a setting was given, looking in this order:
    ///
    /// 1. relation attributes of the service
    /// 2. `inputs/services/<service>/<resource_type>/<name>`
    /// 3. service constraints, then the service's component constraints
    /// 4. `inputs/providers/<provider>/<resource_type>/<name>`
    /// 5. constraints of static blueprint resources
    /// 6. `constrains` entries of blueprint options
    /// 7. `inputs/blueprint/<name>`, then `inputs/<name>`
    /// 8. environment provider constraints, then the `common` provider
    /// 9. resource values, then any deployment path containing `/`
    ///
    /// Returns the query default when nothing matched.
    pub fn get_setting(&self, name: &str, query: &SettingQuery<'_>) -> Result<Option<Value>> {
        if name.is_empty() {
            return Err(ChessboardError::Validation(
                "setting() was called with a blank value. Check your map file for bad calls to 'setting'"
                    .into(),
            ));
        }
        let service = query.service;
        let resource_type = query.resource_type;

        if let (Some(relation), Some(service)) = (query.relation, service) {
            if let Some(result) = self.get_svc_relation_attribute(name, service, relation) {
                debug!("Setting '{}' matched in relation attributes", name);
                return Ok(Some(result));
            }
        }
        if let Some(service) = service {
            if let Some(result) = self.get_input_service_override(name, service, resource_type) {
                debug!("Setting '{}' matched in service override", name);
                return Ok(Some(result));
            }
            if let Some(result) = self.check_services_constraints(name, service)? {
                debug!("Setting '{}' matched in service constraints", name);
                return Ok(Some(result));
            }
        }
        if let Some(provider_key) = query.provider_key {
            if let Some(result) = self.get_input_provider_option(name, provider_key, resource_type) {
                debug!("Setting '{}' matched in provider inputs", name);
                return Ok(Some(result));
            }
        }
        if let Some(result) = self.check_resources_constraints(name, service, resource_type)? {
            debug!("Setting '{}' matched in blueprint resource constraints", name);
            return Ok(Some(result));
        }
        if let Some(result) = self.check_options_constraints(name, service, resource_type)? {
            debug!("Setting '{}' matched in blueprint option constraints", name);
            return Ok(Some(result));
        }
        if let Some(result) = self.get_input_simple(name) {
            debug!("Setting '{}' matched in inputs/blueprint", name);
            return Ok(Some(result));
        }
        if let Some(result) = self.get_input_global(name) {
            debug!("Setting '{}' matched in inputs", name);
            return Ok(Some(result));
        }
        if let Some(provider_key) = query.provider_key {
            if let Some(result) = self.get_env_provider_constraint(name, provider_key, resource_type)? {
                debug!("Setting '{}' matched in environment provider '{}'", name, provider_key);
                return Ok(Some(result));
            }
        }
        if let Some(result) = self.get_env_provider_constraint(name, "common", resource_type)? {
            debug!("Setting '{}' matched 'common' environment setting", name);
            return Ok(Some(result));
        }
        if let Some(result) = present(read_path(self.resources(), name)) {
            debug!("Setting '{}' matched in resources", name);
            return Ok(Some(result.clone()));
        }
        if name.contains('/') {
            if let Some(result) = present(read_path(&self.data, name)) {
                debug!("Setting '{}' matched as a deployment path", name);
                return Ok(Some(result.clone()));
            }
        }

        debug!(
            "Setting '{}' unmatched with resource_type={:?}, service={:?}, provider_key={:?}",
            name, resource_type, service, query.provider_key
        );
        Ok(query.default.clone())
    }

    fn get_svc_relation_attribute(&self, name: &str, service: &str, relation_to: &str) -> Option<Value> {
        let relations = read_path(self.blueprint(), "services")?
            .get(service)?
            .get("relations")?
            .as_array()?;
        relations
            .iter()
            .filter(|relation| {
                relation.get("key").and_then(Value::as_str) == Some(relation_to)
                    || relation.get("service").and_then(Value::as_str) == Some(relation_to)
            })
            .find_map(|relation| present(relation.get("attributes")?.get(name)).cloned())
    }

    fn get_input_service_override(&self, name: &str, service: &str, resource_type: Option<&str>) -> Option<Value> {
        let options = self
            .inputs()
            .get("services")?
            .get(service)?
            .get(resource_type?)?;
        present(options.get(name)).cloned()
    }

    fn check_services_constraints(&self, name: &str, service: &str) -> Result<Option<Value>> {
        let Some(definition) = read_path(self.blueprint(), "services").and_then(|s| s.get(service)) else {
            return Ok(None);
        };
        let sources = [
            definition.get("constraints"),
            definition.get("component").and_then(|c| c.get("constraints")),
        ];
        for constraints in sources.into_iter().flatten() {
            for constraint in Self::parse_constraints(constraints) {
                if constraint.get("setting").and_then(Value::as_str) == Some(name) {
                    return self.apply_constraint(name, &constraint, None, None, None);
                }
            }
        }
        Ok(None)
    }

    fn get_input_provider_option(&self, name: &str, provider_key: &str, resource_type: Option<&str>) -> Option<Value> {
        let options = self
            .inputs()
            .get("providers")?
            .get(provider_key)?
            .get(resource_type?)?;
        present(options.get(name)).cloned()
    }

    fn check_resources_constraints(
        &self,
        name: &str,
        service: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<Option<Value>> {
        let Some(resources) = self.blueprint().get("resources").and_then(Value::as_object) else {
            return Ok(None);
        };
        for (key, resource) in resources {
            let Some(constrains) = resource.get("constrains") else {
                continue;
            };
            for constraint in Self::parse_constraints(constrains) {
                if !Self::constraint_applies(&constraint, name, resource_type, service) {
                    continue;
                }
                let instance = self.resources().get(key).and_then(|r| r.get("instance"));
                if let Some(result) = self.apply_constraint(name, &constraint, None, instance, None)? {
                    debug!("Found setting '{}' from constraint in blueprint resource '{}'", name, key);
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    fn check_options_constraints(
        &self,
        name: &str,
        service: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<Option<Value>> {
        let Some(options) = self.options() else {
            return Ok(None);
        };
        for (key, option) in options {
            // `constrains` 是動詞
            let Some(constrains) = option.get("constrains") else {
                continue;
            };
            for constraint in Self::parse_constraints(constrains) {
                if !Self::constraint_applies(&constraint, name, resource_type, service) {
                    continue;
                }
                if let Some(result) = self.apply_constraint(name, &constraint, Some(option), None, Some(key))? {
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    /// A setting of a static resource, named `resources/<key>/<setting>`,
    /// supplied through a blueprint option that constrains it.
    pub fn get_setting_by_resource_path(&self, path: &str, default: Option<Value>) -> Result<Option<Value>> {
        if let Some(options) = self.options() {
            for (key, option) in options {
                let Some(constrains) = option.get("constrains") else {
                    continue;
                };
                for constraint in Self::parse_constraints(constrains) {
                    if !Self::constraint_applies(&constraint, path, None, None) {
                        continue;
                    }
                    if let Some(result) = self.apply_constraint(path, &constraint, Some(option), None, Some(key))? {
                        debug!("Found setting '{}' from constraint. {}={}", path, key, result);
                        return Ok(Some(result));
                    }
                }
            }
        }
        Ok(default)
    }

    fn get_input_simple(&self, name: &str) -> Option<Value> {
        present(self.inputs().get("blueprint")?.get(name)).cloned()
    }

    fn get_input_global(&self, name: &str) -> Option<Value> {
        present(self.inputs().get(name)).cloned()
    }

    fn get_env_provider_constraint(
        &self,
        name: &str,
        provider_key: &str,
        resource_type: Option<&str>,
    ) -> Result<Option<Value>> {
        let Some(provider) = self
            .data
            .get("environment")
            .and_then(|env| env.get("providers"))
            .and_then(|providers| providers.get(provider_key))
        else {
            return Ok(None);
        };
        let constraints = match provider.get("constraints") {
            None | Some(Value::Null) => return Ok(None),
            Some(constraints @ Value::Array(_)) => constraints,
            Some(_) => {
                return Err(ChessboardError::Validation(format!(
                    "Constraints of provider '{}' need to be a list",
                    provider_key
                )))
            }
        };
        for constraint in Self::parse_constraints(constraints) {
            if Self::constraint_applies(&constraint, name, resource_type, None) {
                return self.apply_constraint(name, &constraint, None, None, None);
            }
        }
        Ok(None)
    }

    /// Normalizes constraints to a list of full entries. A mapping becomes
    /// one `{setting, value}` entry per key, as does a single-key entry
    /// such as `{count: 1}`.
    pub fn parse_constraints(constraints: &Value) -> Vec<Value> {
        let list: Vec<Value> = match constraints {
            Value::Array(list) => list.clone(),
            Value::Object(map) => {
                debug!("Constraints not a list: {}", constraints);
                map.iter()
                    .map(|(setting, value)| json!({"setting": setting, "value": value}))
                    .collect()
            }
            _ => Vec::new(),
        };
        list.into_iter()
            .map(|constraint| match constraint.as_object() {
                Some(map) if map.len() == 1 && !map.contains_key("setting") => {
                    let (setting, value) = map.iter().next().map(|(k, v)| (k.clone(), v.clone())).unwrap_or_default();
                    json!({"setting": setting, "value": value})
                }
                _ => constraint,
            })
            .collect()
    }

    /// Whether `constraint` applies to setting `name` of the given resource
    /// type and service.
    pub fn constraint_applies(
        constraint: &Value,
        name: &str,
        resource_type: Option<&str>,
        service: Option<&str>,
    ) -> bool {
        let field = |key: &str| constraint.get(key);
        let matches = |key: &str, against: Option<&str>| match field(key) {
            None => true,
            Some(expected) => against.is_some_and(|actual| expected.as_str() == Some(actual)),
        };
        if let Some(setting) = field("setting") {
            if setting.as_str() != Some(name) {
                return false;
            }
        }
        matches("resource_type", resource_type) && matches("service", service) && matches("resource", resource_type)
    }

    /// The value a constraint gives a setting: its explicit `value`, else the
    /// constrained resource instance, else the option's input or default.
    /// An `attribute` selects a field of that value.
    fn apply_constraint(
        &self,
        name: &str,
        constraint: &Value,
        option: Option<&Value>,
        resource: Option<&Value>,
        option_key: Option<&str>,
    ) -> Result<Option<Value>> {
        if let Some(value) = constraint.get("value") {
            return Ok(present(Some(value)).cloned());
        }

        let resource = resource.filter(|r| functions::is_truthy(r));
        let mut value = match resource {
            Some(resource) => Some(resource.clone()),
            None => {
                let mut value = option_key.and_then(|key| self.get_input_simple(key));
                if value.is_none() {
                    value = option.and_then(|o| present(o.get("default"))).cloned();
                }
                value
            }
        };

        let is_url = option.and_then(|o| o.get("type")).and_then(Value::as_str) == Some("url");
        if is_url && resource.is_none() {
            if let Some(raw) = &value {
                let mut input = Input::new(raw);
                if raw.is_string() {
                    input.parse_url();
                }
                value = Some(input.to_value());
            }
        }

        if let Some(attribute) = constraint.get("attribute").and_then(Value::as_str) {
            if let Some(current) = &value {
                let result = match current {
                    Value::Object(map) => present(map.get(attribute)).cloned(),
                    other => {
                        return Err(ChessboardError::with_friendly(
                            format!(
                                "Could not read attribute '{}' while obtaining option '{}' since value is of type {}",
                                attribute,
                                name,
                                python_type_name(other)
                            ),
                            BLUEPRINT_ERROR,
                        ))
                    }
                };
                if result.is_some() {
                    return Ok(result);
                }
            }
        }

        Ok(value.filter(|v| !v.is_null()))
    }

    /// True when the service has a `count` constraint of 1.
    pub fn constrained_to_one(&self, service: &str) -> bool {
        let Some(constraints) = read_path(self.blueprint(), "services")
            .and_then(|services| services.get(service))
            .and_then(|definition| definition.get("constraints"))
        else {
            return false;
        };
        let is_one = |value: Option<&Value>| match value {
            Some(Value::Number(n)) => n.as_f64() == Some(1.0),
            Some(Value::String(s)) => s.trim() == "1",
            _ => false,
        };
        Self::parse_constraints(constraints).iter().any(|constraint| {
            is_one(constraint.get("count"))
                || (constraint.get("setting").and_then(Value::as_str) == Some("count")
                    && is_one(constraint.get("value")))
        })
    }

    /// Asks the component's provider for the resources of one instance of
    /// `definition` in `service`.
    pub fn create_resource_template(
        &self,
        index: &str,
        definition: &Value,
        service: Option<&str>,
        environment: &Environment,
    ) -> Result<Vec<Value>> {
        let provider_key = definition.get("provider").and_then(Value::as_str).unwrap_or_default();
        let component_id = definition.get("id").and_then(Value::as_str).unwrap_or_default();
        let provider = environment.get_provider(provider_key)?;
        let component = provider.get_component(component_id).ok_or_else(|| {
            ChessboardError::DoesNotExist(format!(
                "Component '{}' not found in provider '{}'",
                component_id, provider_key
            ))
        })?;
        debug!("Getting resource templates for {}: {}", provider_key, component_id);
        let resource_type = component.resource_type().unwrap_or_default();
        let mut resources = provider.generate_template(self, resource_type, service, index, definition)?;
        for resource in resources.iter_mut() {
            if let Some(map) = resource.as_object_mut() {
                map.entry("component").or_insert_with(|| json!(component_id));
                map.entry("status").or_insert_with(|| json!("NEW"));
                map.entry("desired-state").or_insert_with(|| json!({}));
            }
        }
        Ok(resources)
    }
}
