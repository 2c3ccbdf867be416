//! Checkmatefile schema definitions and a small composable validator.
//!
//! Every [`Schema`] collects all of its errors (instead of stopping at the
//! first one) and tags each error with the path of the offending node so that
//! callers can point at the exact location in the document.

use crate::utils::error::{ChessboardError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::warn;

pub const INTERFACE_TYPES: &[&str] = &[
    "dns_tcp",
    "dns_udp",
    "ftp",
    "gluster",
    "host",
    "http",
    "https",
    "imaps",
    "imapv2",
    "imapv3",
    "imapv4",
    "ldap",
    "ldaps",
    "linux",
    "memcache",
    "mongodb",
    "mssql",
    "mysql",
    "new-relic",
    "nfs",
    "php",
    "pop3",
    "pop3s",
    "postgres",
    "proxy",
    "rackspace-cloud-monitoring",
    "rdp",
    "redis",
    "sftp",
    "smtp",
    "ssh",
    "tcp",
    "tcp_client_first",
    "tcp_stream",
    "udp",
    "udp_stream",
    "url",
    "varnish",
    "vip",
    "windows",
];

pub const RESOURCE_TYPES: &[&str] = &[
    "application",
    "cache",
    "compute",
    "database",
    "database-replica",
    "directory",
    "dns",
    "object-store",
    "host",
    "key-pair",
    "logging",
    "load-balancer",
    "mail-relay",
    "web",
    "monitoring",
    "storage",
    "volume",
];

const SCHEMA_DOCS: &str = include_str!("schema_docs.yaml");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathNode {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathNode::Key(key) => write!(f, "['{}']", key),
            PathNode::Index(index) => write!(f, "[{}]", index),
        }
    }
}

impl From<&str> for PathNode {
    fn from(key: &str) -> Self {
        PathNode::Key(key.to_string())
    }
}

impl From<usize> for PathNode {
    fn from(index: usize) -> Self {
        PathNode::Index(index)
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Invalid {
    pub path: Vec<PathNode>,
    pub msg: String,
    /// Documentation entry of the innermost documented schema on the path.
    pub docs: Option<Value>,
}

impl Invalid {
    fn new(path: &[PathNode], msg: impl Into<String>) -> Self {
        Self {
            path: path.to_vec(),
            msg: msg.into(),
            docs: None,
        }
    }

    pub fn path_string(&self) -> String {
        self.path.iter().map(|node| node.to_string()).collect()
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path_string(), self.msg)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub key: &'static str,
    pub required: bool,
    pub schema: Schema,
}

impl Field {
    pub fn required(key: &'static str, schema: Schema) -> Self {
        Self {
            key,
            required: true,
            schema,
        }
    }

    pub fn optional(key: &'static str, schema: Schema) -> Self {
        Self {
            key,
            required: false,
            schema,
        }
    }
}

#[derive(Debug)]
pub struct DocumentedSchema {
    pub name: String,
    pub schema: Schema,
}

impl DocumentedSchema {
    pub fn new(name: impl Into<String>, schema: Schema) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema,
        })
    }

    /// Validates `data`, decorating every error with the docs of the
    /// innermost documented schema found along its path.
    pub fn validate(&self, data: &Value) -> std::result::Result<Value, Vec<Invalid>> {
        let wrapped = Schema::Named(Arc::new(DocumentedSchema {
            name: self.name.clone(),
            schema: self.schema.clone(),
        }));
        wrapped.validate(data)
    }
}

#[derive(Debug, Clone)]
pub enum Schema {
    Anything,
    Str,
    Int,
    Bool,
    /// bool, number or string
    Scalar,
    /// Any scalar, converted to its string form.
    CoerceStr,
    List,
    Dict,
    Choice(Vec<&'static str>),
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    All(Vec<Schema>),
    ListOf(Box<Schema>),
    DictOf(Box<Schema>),
    Mapping {
        fields: Vec<Field>,
        extra: bool,
    },
    RequireOne(Vec<&'static str>),
    Relation,
    Named(Arc<DocumentedSchema>),
}

impl Schema {
    pub fn mapping(fields: Vec<Field>) -> Self {
        Schema::Mapping {
            fields,
            extra: false,
        }
    }

    pub fn list_of(schema: Schema) -> Self {
        Schema::ListOf(Box::new(schema))
    }

    pub fn dict_of(schema: Schema) -> Self {
        Schema::DictOf(Box::new(schema))
    }

    fn any_or(choices: &[&'static str]) -> Self {
        let mut values = vec!["*"];
        values.extend_from_slice(choices);
        Schema::Choice(values)
    }

    /// Validates `data`, returning the normalized value or every error found.
    pub fn validate(&self, data: &Value) -> std::result::Result<Value, Vec<Invalid>> {
        let mut errors = Vec::new();
        let mut path = Vec::new();
        let output = self.check(data, &mut path, &mut errors);
        if errors.is_empty() {
            return Ok(output);
        }
        let docs = docs();
        for error in errors.iter_mut() {
            if let Some(name) = self.find_schema_name(&error.path) {
                error.docs = docs.get(&name).cloned();
            }
        }
        Err(errors)
    }

    fn check(&self, data: &Value, path: &mut Vec<PathNode>, errors: &mut Vec<Invalid>) -> Value {
        match self {
            Schema::Anything => data.clone(),
            Schema::Str => {
                if !data.is_string() {
                    errors.push(Invalid::new(path, "expected str"));
                }
                data.clone()
            }
            Schema::Int => {
                if !(data.is_i64() || data.is_u64()) {
                    errors.push(Invalid::new(path, "expected int"));
                }
                data.clone()
            }
            Schema::Bool => {
                if !data.is_boolean() {
                    errors.push(Invalid::new(path, "expected bool"));
                }
                data.clone()
            }
            Schema::Scalar => {
                if !(data.is_boolean() || data.is_number() || data.is_string()) {
                    errors.push(Invalid::new(path, "expected bool, float, int or str"));
                }
                data.clone()
            }
            Schema::CoerceStr => match data {
                Value::String(_) => data.clone(),
                Value::Number(number) => Value::String(number.to_string()),
                Value::Bool(flag) => Value::String(if *flag { "True" } else { "False" }.into()),
                _ => {
                    errors.push(Invalid::new(path, "expected str"));
                    data.clone()
                }
            },
            Schema::List => {
                if !data.is_array() {
                    errors.push(Invalid::new(path, "expected a list"));
                }
                data.clone()
            }
            Schema::Dict => {
                if !data.is_object() {
                    errors.push(Invalid::new(path, "expected a dictionary"));
                }
                data.clone()
            }
            Schema::Choice(choices) => {
                let valid = data
                    .as_str()
                    .map(|value| choices.contains(&value))
                    .unwrap_or(false);
                if !valid {
                    errors.push(Invalid::new(path, "not a valid value"));
                }
                data.clone()
            }
            Schema::Length { min, max } => {
                let length = match data {
                    Value::String(text) => text.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    _ => {
                        errors.push(Invalid::new(path, "expected a sized value"));
                        return data.clone();
                    }
                };
                if let Some(min) = min {
                    if length < *min {
                        errors.push(Invalid::new(
                            path,
                            format!("length of value must be at least {}", min),
                        ));
                    }
                }
                if let Some(max) = max {
                    if length > *max {
                        errors.push(Invalid::new(
                            path,
                            format!("length of value must be at most {}", max),
                        ));
                    }
                }
                data.clone()
            }
            Schema::All(schemas) => {
                let mut current = data.clone();
                for schema in schemas {
                    let before = errors.len();
                    current = schema.check(&current, path, errors);
                    if errors.len() > before {
                        break;
                    }
                }
                current
            }
            Schema::ListOf(schema) => {
                let Some(items) = data.as_array() else {
                    errors.push(Invalid::new(path, "expected a list"));
                    return data.clone();
                };
                let mut output = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(PathNode::Index(index));
                    output.push(schema.check(item, path, errors));
                    path.pop();
                }
                Value::Array(output)
            }
            Schema::DictOf(schema) => {
                let Some(map) = data.as_object() else {
                    errors.push(Invalid::new(path, "expected a dictionary"));
                    return data.clone();
                };
                let mut output = Map::new();
                for (key, value) in map {
                    path.push(PathNode::Key(key.clone()));
                    output.insert(key.clone(), schema.check(value, path, errors));
                    path.pop();
                }
                Value::Object(output)
            }
            Schema::Mapping { fields, extra } => {
                let Some(map) = data.as_object() else {
                    errors.push(Invalid::new(path, "expected a dictionary"));
                    return data.clone();
                };
                let mut output = Map::new();
                for (key, value) in map {
                    path.push(PathNode::Key(key.clone()));
                    match fields.iter().find(|field| field.key == key) {
                        Some(field) => {
                            output.insert(key.clone(), field.schema.check(value, path, errors));
                        }
                        None if *extra => {
                            output.insert(key.clone(), value.clone());
                        }
                        None => errors.push(Invalid::new(path, "extra keys not allowed")),
                    }
                    path.pop();
                }
                for field in fields.iter().filter(|field| field.required) {
                    if !map.contains_key(field.key) {
                        path.push(PathNode::Key(field.key.to_string()));
                        errors.push(Invalid::new(path, "required key not provided"));
                        path.pop();
                    }
                }
                Value::Object(output)
            }
            Schema::RequireOne(keys) => {
                let found = data
                    .as_object()
                    .map(|map| keys.iter().any(|key| map.contains_key(*key)))
                    .unwrap_or(false);
                if !found {
                    errors.push(Invalid::new(
                        path,
                        format!("one of '{}' is required", keys.join(", ")),
                    ));
                }
                data.clone()
            }
            Schema::Relation => {
                let long_form = match coerce_relation(data) {
                    Ok(long_form) => long_form,
                    Err(msg) => {
                        errors.push(Invalid::new(path, msg));
                        return data.clone();
                    }
                };
                relation_long_schema().check(&long_form, path, errors)
            }
            Schema::Named(documented) => documented.schema.check(data, path, errors),
        }
    }

    /// Returns the name of the innermost documented schema reached by
    /// following `path` from this schema.
    pub fn find_schema_name(&self, path: &[PathNode]) -> Option<String> {
        let mut found = None;
        let mut current = self;
        let mut remaining = path;
        loop {
            match current {
                Schema::Named(documented) => {
                    found = Some(documented.name.clone());
                    current = &documented.schema;
                    continue;
                }
                Schema::All(schemas) => {
                    match schemas.iter().find(|s| {
                        matches!(s, Schema::Mapping { .. } | Schema::Named(_))
                    }) {
                        Some(schema) => {
                            current = schema;
                            continue;
                        }
                        None => return found,
                    }
                }
                _ => {}
            }
            let Some((node, rest)) = remaining.split_first() else {
                return found;
            };
            current = match (current, node) {
                (Schema::Mapping { fields, .. }, PathNode::Key(key)) => {
                    match fields.iter().find(|field| field.key == key) {
                        Some(field) => &field.schema,
                        None => return found,
                    }
                }
                (Schema::DictOf(inner), _) | (Schema::ListOf(inner), _) => inner.as_ref(),
                _ => return found,
            };
            remaining = rest;
        }
    }
}

/// Converts the shorthand relation forms `{service: interface}` and
/// `{service: "interface#tag"}` into the long form.
pub fn coerce_relation(entry: &Value) -> std::result::Result<Value, &'static str> {
    let Some(map) = entry.as_object() else {
        return Err("not a valid relation entry");
    };
    if map.len() != 1 {
        return Ok(entry.clone());
    }
    let Some((service, value)) = map.iter().next() else {
        return Ok(entry.clone());
    };
    let Some(value) = value.as_str() else {
        return Err("not a valid relation value");
    };
    let mut long_form = Map::new();
    long_form.insert("service".into(), Value::String(service.clone()));
    match value.split_once('#') {
        Some((interface, tag)) => {
            let tag = tag.split('#').next().unwrap_or(tag);
            long_form.insert("interface".into(), Value::String(interface.to_string()));
            long_form.insert("connect-from".into(), Value::String(tag.to_string()));
        }
        None => {
            long_form.insert("interface".into(), Value::String(value.to_string()));
        }
    }
    Ok(Value::Object(long_form))
}

/// `parse_type_name("list(int)")` returns `("list", Some("int"))`.
pub fn parse_type_name(type_string: &str) -> (String, Option<String>) {
    let Ok(pattern) = Regex::new(r"^(?P<fxn>dict|list)\((?P<type>\w*)\)") else {
        return (type_string.to_string(), None);
    };
    match pattern.captures(type_string) {
        Some(caps) => (caps["fxn"].to_string(), Some(caps["type"].to_string())),
        None => (type_string.to_string(), None),
    }
}

fn relation_long_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::mapping(vec![
            Field::required("service", Schema::Str),
            Field::required("interface", Schema::any_or(INTERFACE_TYPES)),
            Field::optional("connect-from", Schema::Str),
            Field::optional("connect-to", Schema::Str),
            Field::optional("constraints", Schema::List),
            Field::optional("attributes", Schema::Dict),
        ])
    })
}

fn constraint_schema() -> Schema {
    Schema::mapping(vec![
        Field::required("setting", Schema::Str),
        Field::optional("value", Schema::Scalar),
        Field::optional("message", Schema::Str),
        Field::optional("provider", Schema::Str),
        Field::optional("resource_type", Schema::Str),
        Field::optional("service", Schema::Str),
        Field::optional("resource", Schema::Str),
        Field::optional("greater-than", Schema::CoerceStr),
        Field::optional("less-than", Schema::CoerceStr),
        Field::optional("greater-than-or-equal-to", Schema::CoerceStr),
        Field::optional("less-than-or-equal-to", Schema::CoerceStr),
        Field::optional("min-length", Schema::Int),
        Field::optional("max-length", Schema::Int),
        Field::optional("allowed-chars", Schema::CoerceStr),
        Field::optional("required-chars", Schema::CoerceStr),
        Field::optional("in", Schema::List),
        Field::optional("protocols", Schema::List),
        Field::optional("regex", Schema::Str),
    ])
}

fn component_selector_schema() -> Schema {
    Schema::All(vec![
        Schema::mapping(vec![
            Field::optional(
                "id",
                Schema::All(vec![
                    Schema::Str,
                    Schema::Length {
                        min: Some(3),
                        max: Some(32),
                    },
                ]),
            ),
            Field::optional("name", Schema::Str),
            Field::optional("interface", Schema::any_or(INTERFACE_TYPES)),
            Field::optional("resource_type", Schema::any_or(RESOURCE_TYPES)),
            Field::optional("type", Schema::any_or(RESOURCE_TYPES)),
            Field::optional("role", Schema::Str),
            Field::optional("constraints", Schema::list_of(Schema::Dict)),
        ]),
        Schema::RequireOne(vec!["id", "name", "resource_type", "type"]),
    ])
}

/// Every documented schema, keyed by name.
pub struct Schemas {
    pub relation: Arc<DocumentedSchema>,
    pub constraint: Arc<DocumentedSchema>,
    pub service: Arc<DocumentedSchema>,
    pub blueprint: Arc<DocumentedSchema>,
    pub component: Arc<DocumentedSchema>,
    pub checkmatefile: Arc<DocumentedSchema>,
}

fn build_schemas() -> Schemas {
    let relation = DocumentedSchema::new("relation", Schema::Relation);
    let constraint = DocumentedSchema::new("constraint", constraint_schema());
    let service = DocumentedSchema::new(
        "service",
        Schema::mapping(vec![
            Field::required("component", component_selector_schema()),
            Field::optional(
                "relations",
                Schema::list_of(Schema::Named(relation.clone())),
            ),
            Field::optional(
                "constraints",
                Schema::list_of(Schema::Named(constraint.clone())),
            ),
            Field::optional("display-name", Schema::Str),
        ]),
    );
    let blueprint = DocumentedSchema::new(
        "blueprint",
        Schema::mapping(vec![
            Field::optional("id", Schema::Str),
            Field::optional("name", Schema::Str),
            Field::required("services", Schema::dict_of(Schema::Named(service.clone()))),
            Field::optional("version", Schema::Str),
            Field::optional("description", Schema::Str),
            Field::optional("options", Schema::Dict),
            Field::optional("resources", Schema::Dict),
            Field::optional("meta-data", Schema::Dict),
            Field::optional("documentation", Schema::Anything),
            Field::optional(
                "source",
                Schema::mapping(vec![
                    Field::required("repo-url", Schema::Str),
                    Field::required("sha", Schema::Str),
                    Field::optional("ref", Schema::Str),
                ]),
            ),
        ]),
    );
    let component = DocumentedSchema::new(
        "component",
        Schema::mapping(vec![
            Field::required("name", Schema::Str),
            Field::optional("id", Schema::Str),
            Field::optional("is", Schema::Str),
            Field::optional("resource_type", Schema::Str),
            Field::optional("type", Schema::Str),
            Field::optional("role", Schema::Str),
            Field::optional("port", Schema::Anything),
            Field::optional("provides", Schema::List),
            Field::optional("requires", Schema::List),
            Field::optional("supports", Schema::List),
            Field::optional("files", Schema::list_of(Schema::Dict)),
            Field::optional("commands", Schema::Dict),
        ]),
    );
    let checkmatefile = DocumentedSchema::new(
        "checkmatefile",
        Schema::mapping(vec![
            Field::required("blueprint", Schema::Named(blueprint.clone())),
            Field::optional("environment", Schema::Anything),
            Field::optional("inputs", Schema::Anything),
            Field::optional("flavors", Schema::Anything),
            Field::optional("include", Schema::Anything),
            Field::optional("components", Schema::list_of(Schema::Named(component.clone()))),
        ]),
    );

    Schemas {
        relation,
        constraint,
        service,
        blueprint,
        component,
        checkmatefile,
    }
}

pub fn schemas() -> &'static Schemas {
    static SCHEMAS: OnceLock<Schemas> = OnceLock::new();
    SCHEMAS.get_or_init(|| {
        let built = build_schemas();
        let registry = registry();
        for schema in [
            &built.relation,
            &built.constraint,
            &built.service,
            &built.blueprint,
            &built.component,
            &built.checkmatefile,
        ] {
            if let Err(e) = registry.register(schema.clone()) {
                warn!("Schema registration failed: {}", e);
            }
        }
        built
    })
}

pub fn checkmatefile_schema() -> Schema {
    Schema::Named(schemas().checkmatefile.clone())
}

pub fn component_schema() -> Schema {
    Schema::Named(schemas().component.clone())
}

/// 已註冊的具名 schema
#[derive(Default)]
pub struct SchemaRegistry {
    types: Mutex<HashMap<String, Arc<DocumentedSchema>>>,
}

impl SchemaRegistry {
    /// Registers a schema under its name. Registering a different schema
    /// under an existing name fails.
    pub fn register(&self, schema: Arc<DocumentedSchema>) -> Result<Arc<DocumentedSchema>> {
        let mut types = self
            .types
            .lock()
            .map_err(|_| ChessboardError::BadState("Schema registry is poisoned".into()))?;
        if let Some(existing) = types.get(&schema.name) {
            if !Arc::ptr_eq(existing, &schema) {
                return Err(ChessboardError::Index(schema.name.clone()));
            }
        }
        types.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DocumentedSchema>> {
        self.types.lock().ok()?.get(name).cloned()
    }
}

pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SchemaRegistry::default)
}

/// Loads schema documentation entries. Each entry needs `fields` and may
/// carry `type`, `description`, `docs` and `shorthand`; `type` defaults to
/// the entry name.
pub fn load_docs(text: &str) -> Result<IndexMap<String, Value>> {
    let contents: Value = serde_yaml::from_str(text)?;
    let Value::Object(entries) = contents else {
        return Err(ChessboardError::Validation(
            "Schema docs must be a mapping".to_string(),
        ));
    };
    let entry_schema = Schema::mapping(vec![
        Field::optional("type", Schema::Str),
        Field::required("fields", Schema::Anything),
        Field::optional("description", Schema::Str),
        Field::optional("docs", Schema::Str),
        Field::optional("shorthand", Schema::Str),
    ]);

    let mut results = IndexMap::new();
    for (key, definition) in entries {
        if let Err(errors) = entry_schema.validate(&definition) {
            let detail = errors
                .iter()
                .map(|error| error.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            warn!("Schema docs entry '{}' has bad data: {}", key, detail);
            return Err(ChessboardError::Validation(format!(
                "Schema docs entry '{}' has bad data: {}",
                key, detail
            )));
        }
        let mut definition = definition;
        if let Value::Object(map) = &mut definition {
            map.entry("type")
                .or_insert_with(|| Value::String(key.clone()));
        }
        results.insert(key, definition);
    }
    Ok(results)
}

pub fn docs() -> &'static IndexMap<String, Value> {
    static DOCS: OnceLock<IndexMap<String, Value>> = OnceLock::new();
    DOCS.get_or_init(|| match load_docs(SCHEMA_DOCS) {
        Ok(docs) => docs,
        Err(e) => {
            warn!("Embedded schema docs are not valid: {}", e);
            IndexMap::new()
        }
    })
}

/// Renders the markdown glossary of every documented entry.
pub fn generate_docs(docs: &IndexMap<String, Value>) -> String {
    let mut toc = Vec::new();
    let mut body = Vec::new();
    for (name, content) in docs {
        if let Some(markdown) = content.get("docs").and_then(Value::as_str) {
            toc.push(format!("[{}](#{})", name, name));
            body.push(format!(
                "#### <a name=\"{}\"></a>{}\n\n{}",
                name, name, markdown
            ));
        }
    }
    format!(
        "<!--Content autogenerated from schema_docs.yaml-->\n# Glossary\n\n{}  \n\n{}\n",
        toc.join("  \n"),
        body.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn simple_schema() -> Schema {
        let component = Schema::mapping(vec![
            Field::required("interface", Schema::Str),
            Field::required("type", Schema::Str),
        ]);
        let service = Schema::mapping(vec![
            Field::required("component", component),
            Field::optional("relations", Schema::list_of(Schema::Dict)),
        ]);
        let blueprint = Schema::mapping(vec![Field::required("services", Schema::dict_of(service))]);
        Schema::mapping(vec![Field::required("blueprint", blueprint)])
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_dict_of_valid() {
        let content = yaml(
            "blueprint:\n  services:\n    comp1:\n      component:\n        interface: http\n        type: bar\n      relations:\n      - comp2: http\n    comp2:\n      component:\n        interface: http\n        type: baz\n",
        );
        assert_eq!(simple_schema().validate(&content).unwrap(), content);
    }

    #[test]
    fn test_dict_of_missing_required() {
        let content = yaml(
            "blueprint:\n  services:\n    comp2:\n      component:\n        interface: http\n        type: baz\n    comp3:\n      relations:\n      - comp2: http\n",
        );
        let errors = simple_schema().validate(&content).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].path,
            vec![
                PathNode::from("blueprint"),
                PathNode::from("services"),
                PathNode::from("comp3"),
                PathNode::from("component"),
            ]
        );
    }

    #[test]
    fn test_dict_of_not_a_dict() {
        let content = yaml("blueprint:\n  services:\n    - comp1: {}\n");
        let errors = simple_schema().validate(&content).unwrap_err();
        assert_eq!(errors[0].path_string(), "['blueprint']['services']");
        assert_eq!(errors[0].msg, "expected a dictionary");
    }

    #[test]
    fn test_require_one() {
        let schema = Schema::RequireOne(vec!["a", "b"]);
        assert!(schema.validate(&json!({"a": 1})).is_ok());
        assert!(schema.validate(&json!({"b": 1})).is_ok());
        assert!(schema.validate(&json!({"a": 1, "b": 2})).is_ok());
        let errors = schema.validate(&json!({"x": 1})).unwrap_err();
        assert_eq!(errors[0].msg, "one of 'a, b' is required");
        assert!(schema.validate(&json!({})).is_err());
    }

    #[test]
    fn test_parse_type_name() {
        assert_eq!(parse_type_name("string"), ("string".to_string(), None));
        assert_eq!(
            parse_type_name("list(int)"),
            ("list".to_string(), Some("int".to_string()))
        );
        assert_eq!(
            parse_type_name("dict(option)"),
            ("dict".to_string(), Some("option".to_string()))
        );
        assert_eq!(parse_type_name("else(option)"), ("else(option)".to_string(), None));
    }

    #[test]
    fn test_docs_valid() {
        let docs = load_docs(SCHEMA_DOCS).unwrap();
        for name in ["checkmatefile", "blueprint", "service", "relation", "constraint", "component"] {
            assert!(docs.contains_key(name), "missing docs for {}", name);
        }
        assert_eq!(docs["blueprint"]["type"], json!("blueprint"));
    }

    #[test]
    fn test_load_docs_rejects_missing_fields() {
        assert!(load_docs("foo:\n  docs: text\n").is_err());
    }

    #[test]
    fn test_find_schema_name() {
        let schema = checkmatefile_schema();
        assert_eq!(
            schema.find_schema_name(&[PathNode::from("blueprint")]).as_deref(),
            Some("blueprint")
        );
        let deep = [
            PathNode::from("blueprint"),
            PathNode::from("services"),
            PathNode::from("lb"),
            PathNode::from("constraints"),
            PathNode::from(0),
            PathNode::from("foo"),
        ];
        assert_eq!(schema.find_schema_name(&deep).as_deref(), Some("constraint"));
    }

    #[test]
    fn test_undocumented_error() {
        let schema = Schema::mapping(vec![Field::optional("foo", Schema::Int)]);
        let errors = schema.validate(&json!({"bar": 2})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].docs.is_none());
    }

    #[test]
    fn test_fail_double_registration() {
        let name = uuid::Uuid::new_v4().simple().to_string();
        let schema1 = DocumentedSchema::new(name.clone(), Schema::Str);
        let schema2 = DocumentedSchema::new(name.clone(), Schema::Int);
        assert!(registry().register(schema1.clone()).is_ok());
        assert!(registry().register(schema1).is_ok());
        assert!(matches!(
            registry().register(schema2),
            Err(ChessboardError::Index(_))
        ));
    }

    #[test]
    fn test_generate_docs() {
        let mut docs = IndexMap::new();
        docs.insert("foo".to_string(), json!({"docs": "**markdown**"}));
        assert_eq!(
            generate_docs(&docs),
            "<!--Content autogenerated from schema_docs.yaml-->\n# Glossary\n\n[foo](#foo)  \n\n#### <a name=\"foo\"></a>foo\n\n**markdown**\n"
        );
    }

    #[test]
    fn test_relation_coercion() {
        let schema = Schema::list_of(Schema::Relation);
        let relations = yaml(
            "- db: mysql\n- cache: redis#objects\n- service: foo\n  interface: varnish\n  connect-from: sessions\n  connect-to: persistent\n  attributes:\n    timeout: 300\n",
        );
        let output = schema.validate(&relations).unwrap();
        assert_eq!(
            output,
            json!([
                {"service": "db", "interface": "mysql"},
                {"service": "cache", "interface": "redis", "connect-from": "objects"},
                {
                    "service": "foo",
                    "interface": "varnish",
                    "connect-from": "sessions",
                    "connect-to": "persistent",
                    "attributes": {"timeout": 300}
                }
            ])
        );
    }

    #[test]
    fn test_relation_negatives() {
        let schema = Schema::list_of(Schema::Relation);
        let errors = schema
            .validate(&json!([{"pages": {"service": "cache", "interface": "memcache"}}]))
            .unwrap_err();
        assert_eq!(errors[0].to_string(), "[0]: not a valid relation value");

        let errors = Schema::Relation.validate(&json!("string")).unwrap_err();
        assert_eq!(errors[0].msg, "not a valid relation entry");

        let errors = schema
            .validate(&json!([{"connect-to": "test", "interface": "mysql"}]))
            .unwrap_err();
        assert_eq!(errors[0].to_string(), "[0]['service']: required key not provided");
    }
}
