//! Edits the components of a `blueprint.yaml` from the command line.
//!
//! Connection points are given as `<resource_type>:<interface>[<port>?]#<name>`:
//!
//! - `database:mysql` a mysql database
//! - `application:http[8080]` an http application on port 8080
//! - `application:http[8081?]#admin` port 8081 or any free port, tagged `admin`

use crate::utils::error::{ChessboardError, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

pub const VERSION: &str = "0.0.0";
pub const DEFAULT_FILE: &str = "blueprint.yaml";
pub const DEFAULT_NAME: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub resource_type: String,
    pub interface: String,
    pub port: Option<String>,
    /// fall back to any free port
    pub free: bool,
    pub tag: Option<String>,
}

impl TypeSpec {
    /// The port as written to the blueprint, `8080?` when free.
    pub fn port_value(&self) -> Option<Value> {
        self.port.as_ref().map(|port| {
            if self.free {
                Value::String(format!("{}?", port))
            } else {
                Value::String(port.clone())
            }
        })
    }
}

fn spec_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(
        r"^(?P<type>\w+):(?P<interface>\w+)(\[(?P<port>\d+)(?P<free>\?)?\])?(#(?P<tag>\w*))?",
    )
    .map_err(|e| ChessboardError::general(format!("Invalid type spec pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| pattern))
}

pub fn parse_spec(type_spec: &str) -> Result<TypeSpec> {
    let caps = spec_pattern()?.captures(type_spec).ok_or_else(|| {
        ChessboardError::InvalidParameter(format!(
            "Invalid type spec '{}'. Expected <resource_type>:<interface>[<port>?]#<name>",
            type_spec
        ))
    })?;
    let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    Ok(TypeSpec {
        resource_type: group("type").unwrap_or_default(),
        interface: group("interface").unwrap_or_default(),
        port: group("port"),
        free: caps.name("free").is_some(),
        tag: group("tag").filter(|tag| !tag.is_empty()),
    })
}

/// Indexes of the connection points matching the filters. `*` matches
/// anything. Short-form entries (`{database: mysql}`) are matched on their
/// key.
pub fn find_connection_points(
    points: &[Value],
    tag: Option<&str>,
    interface: Option<&str>,
    resource_type: Option<&str>,
) -> Result<Vec<usize>> {
    let resource_type = resource_type.filter(|t| *t != "*");
    let interface = interface.filter(|i| *i != "*");
    let mut matches = Vec::new();
    for (index, entry) in points.iter().enumerate() {
        let mut entry_type = entry.get("resource_type").and_then(Value::as_str);
        let mut entry_interface = entry.get("interface").and_then(Value::as_str);
        if let Some(short) = resource_type.and_then(|t| entry.get(t).map(|i| (t, i))) {
            if entry_type.is_some() {
                return Err(ChessboardError::Validation(
                    "resource_type specified in short and long form".into(),
                ));
            }
            entry_type = Some(short.0);
            entry_interface = short.1.as_str();
        }
        if resource_type.is_some() && entry_type != resource_type {
            continue;
        }
        if interface.is_some() && entry_interface != interface {
            continue;
        }
        if tag.is_some() && entry.get("name").and_then(Value::as_str) != tag {
            continue;
        }
        matches.push(index);
    }
    Ok(matches)
}

fn new_point(spec: &TypeSpec) -> Map<String, Value> {
    let mut point = Map::new();
    if !spec.resource_type.is_empty() && spec.resource_type != "*" {
        point.insert(spec.resource_type.clone(), json!(spec.interface));
    } else {
        point.insert("interface".into(), json!(spec.interface));
    }
    if let Some(tag) = &spec.tag {
        point.insert("name".into(), json!(tag));
    }
    point
}

/// A blueprint file being edited.
#[derive(Debug, Clone)]
pub struct BlueprintFile {
    path: PathBuf,
    contents: Value,
}

impl BlueprintFile {
    /// Loads `path`. A missing file starts as `{components: {}}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = match std::fs::read_to_string(&path) {
            Ok(text) => serde_yaml::from_str::<Value>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, starting a new blueprint", path.display());
                json!({"components": {}})
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, contents })
    }

    pub fn contents(&self) -> &Value {
        &self.contents
    }

    pub fn save(&self) -> Result<()> {
        std::fs::write(&self.path, serde_yaml::to_string(&self.contents)?)?;
        Ok(())
    }

    /// The named component, created when missing.
    pub fn component_mut(&mut self, name: &str) -> Result<&mut Map<String, Value>> {
        let root = self
            .contents
            .as_object_mut()
            .ok_or_else(|| ChessboardError::Validation("Blueprint file is not a mapping".into()))?;
        let components = root.entry("components").or_insert_with(|| json!({}));
        if components.is_null() {
            *components = json!({});
        }
        components
            .as_object_mut()
            .ok_or_else(|| ChessboardError::Validation("'components' is not a mapping".into()))?
            .entry(name)
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| ChessboardError::Validation(format!("Component '{}' is not a mapping", name)))
    }

    /// Finds matching points under `key`, appending a new one when none
    /// match, then applies `update` to each. Returns the updated points.
    fn upsert<F>(&mut self, name: &str, key: &str, spec: &TypeSpec, update: F) -> Result<Vec<Value>>
    where
        F: Fn(&mut Map<String, Value>),
    {
        let component = self.component_mut(name)?;
        let list = component.entry(key).or_insert_with(|| json!([]));
        if list.is_null() {
            *list = json!([]);
        }
        let points = list
            .as_array_mut()
            .ok_or_else(|| ChessboardError::Validation(format!("'{}' is not a list", key)))?;
        let mut matches = find_connection_points(
            points,
            spec.tag.as_deref(),
            Some(&spec.interface),
            Some(&spec.resource_type),
        )?;
        if matches.is_empty() {
            points.push(Value::Object(new_point(spec)));
            matches.push(points.len() - 1);
        }
        let mut updated = Vec::with_capacity(matches.len());
        for index in matches {
            if let Some(point) = points.get_mut(index).and_then(Value::as_object_mut) {
                update(point);
                updated.push(Value::Object(point.clone()));
            }
        }
        Ok(updated)
    }

    /// Marks a provided point as exposed outside the deployment.
    pub fn exposes(&mut self, name: &str, spec: &TypeSpec) -> Result<Vec<Value>> {
        let port = spec.port_value();
        self.upsert(name, "provides", spec, |point| {
            if let Some(port) = &port {
                point.entry("port").or_insert_with(|| port.clone());
            }
            point.insert("exposed".into(), Value::Bool(true));
        })
    }

    pub fn provides(&mut self, name: &str, spec: &TypeSpec) -> Result<Vec<Value>> {
        let port = spec.port_value();
        self.upsert(name, "provides", spec, |point| {
            if let Some(port) = &port {
                point.insert("port".into(), port.clone());
            }
        })
    }

    pub fn requires(&mut self, name: &str, spec: &TypeSpec) -> Result<Vec<Value>> {
        self.upsert(name, "requires", spec, |_| {})
    }

    pub fn supports(&mut self, name: &str, spec: &TypeSpec) -> Result<Vec<Value>> {
        self.upsert(name, "supports", spec, |_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_spec() {
        let spec = parse_spec("database:http[8080?]#name").unwrap();
        assert_eq!(
            spec,
            TypeSpec {
                resource_type: "database".into(),
                interface: "http".into(),
                port: Some("8080".into()),
                free: true,
                tag: Some("name".into()),
            }
        );

        let spec = parse_spec("database:http[8080]#name").unwrap();
        assert!(!spec.free);
        assert_eq!(spec.port.as_deref(), Some("8080"));

        let spec = parse_spec("database:http[8080?]").unwrap();
        assert!(spec.free);
        assert_eq!(spec.tag, None);

        let spec = parse_spec("database:http#name").unwrap();
        assert_eq!(spec.port, None);
        assert_eq!(spec.tag.as_deref(), Some("name"));

        let spec = parse_spec("database:http").unwrap();
        assert_eq!((spec.port, spec.free, spec.tag), (None, false, None));

        assert!(parse_spec("database").is_err());
    }

    fn blueprint(dir: &TempDir) -> BlueprintFile {
        BlueprintFile::load(dir.path().join(DEFAULT_FILE)).unwrap()
    }

    #[test]
    fn test_commands() {
        let dir = TempDir::new().unwrap();

        let result = blueprint(&dir)
            .exposes(DEFAULT_NAME, &parse_spec("application:http").unwrap())
            .unwrap();
        assert_eq!(result, vec![json!({"application": "http", "exposed": true})]);

        let result = blueprint(&dir)
            .provides(DEFAULT_NAME, &parse_spec("application:http[8080?]#magento").unwrap())
            .unwrap();
        assert_eq!(
            result,
            vec![json!({"application": "http", "name": "magento", "port": "8080?"})]
        );

        let result = blueprint(&dir)
            .supports(DEFAULT_NAME, &parse_spec("cache:redis#objects").unwrap())
            .unwrap();
        assert_eq!(result, vec![json!({"cache": "redis", "name": "objects"})]);

        let result = blueprint(&dir)
            .requires(DEFAULT_NAME, &parse_spec("database:mysql[8080]#users").unwrap())
            .unwrap();
        assert_eq!(result, vec![json!({"database": "mysql", "name": "users"})]);
    }

    #[test]
    fn test_existing_points_are_updated_and_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_FILE);

        let mut file = BlueprintFile::load(&path).unwrap();
        file.provides("web", &parse_spec("application:http[80]").unwrap())
            .unwrap();
        file.save().unwrap();

        let mut file = BlueprintFile::load(&path).unwrap();
        let result = file
            .exposes("web", &parse_spec("application:http").unwrap())
            .unwrap();
        assert_eq!(
            result,
            vec![json!({"application": "http", "port": "80", "exposed": true})]
        );
        assert_eq!(
            file.contents()["components"]["web"]["provides"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_find_connection_points() {
        let points = vec![
            json!({"database": "mysql", "name": "users"}),
            json!({"resource_type": "cache", "interface": "redis"}),
        ];
        assert_eq!(
            find_connection_points(&points, None, Some("mysql"), Some("database")).unwrap(),
            vec![0]
        );
        assert_eq!(
            find_connection_points(&points, None, Some("*"), Some("cache")).unwrap(),
            vec![1]
        );
        assert_eq!(
            find_connection_points(&points, Some("users"), None, Some("*")).unwrap(),
            vec![0]
        );

        let both = vec![json!({"database": "mysql", "resource_type": "database"})];
        assert!(find_connection_points(&both, None, None, Some("database")).is_err());
    }
}
