use serde_json::{Map, Value};

const CONNECTION_FIELDS: &[&str] = &[
    "resource_type",
    "type",
    "interface",
    "relation",
    "name",
    "port",
    "constraints",
    "attributes",
];

/// An application component offered by a provider.
///
/// `provides`, `requires` and `supports` are lists in component files. The
/// planner works with them as mappings keyed by connection point, see
/// [`connection_points`].
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    data: Map<String, Value>,
    provider: Option<String>,
}

impl Component {
    pub fn new(mut data: Map<String, Value>, provider: Option<&str>) -> Self {
        if let Some(key) = provider {
            data.insert("provider".into(), Value::String(key.to_string()));
        }
        Self {
            data,
            provider: provider.map(str::to_string),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    /// The first of `is`, `type` and `resource_type` that is set.
    pub fn resource_type(&self) -> Option<&str> {
        ["is", "type", "resource_type"]
            .iter()
            .find_map(|key| self.data.get(*key).and_then(Value::as_str))
    }

    pub fn provider_key(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn provides(&self) -> Map<String, Value> {
        connection_points(self.data.get("provides"), "provides")
    }

    pub fn requires(&self) -> Map<String, Value> {
        connection_points(self.data.get("requires"), "requires")
    }

    pub fn supports(&self) -> Map<String, Value> {
        connection_points(self.data.get("supports"), "supports")
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// The component as the planner records it: keyed connection points and
    /// a normalized `resource_type`.
    pub fn definition(&self) -> Value {
        let mut definition = self.data.clone();
        if let Some(resource_type) = self.resource_type() {
            definition.insert("resource_type".into(), Value::String(resource_type.to_string()));
        }
        definition.insert("provides".into(), Value::Object(self.provides()));
        definition.insert("requires".into(), Value::Object(self.requires()));
        definition.insert("supports".into(), Value::Object(self.supports()));
        Value::Object(definition)
    }

    /// Equality match on `id`, `name`, `role` and `resource_type`. An
    /// `interface` condition matches any provided interface; components that
    /// declare nothing they provide accept any interface. `*` and null
    /// conditions match anything.
    pub fn matches(&self, conditions: &Map<String, Value>) -> bool {
        conditions.iter().all(|(key, expected)| {
            if expected.is_null() || expected.as_str() == Some("*") {
                return true;
            }
            match key.as_str() {
                "resource_type" => self.resource_type() == expected.as_str(),
                "id" | "name" | "role" => self.data.get(key) == Some(expected),
                "interface" => {
                    let provides = self.provides();
                    provides.is_empty()
                        || provides
                            .values()
                            .any(|point| point.get("interface") == Some(expected))
                }
                _ => true,
            }
        })
    }
}

/// Normalizes a single connection point entry.
///
/// `{database: mysql}` becomes `{resource_type: database, interface: mysql}`
/// and `{host: linux}` a host relation on a compute resource.
pub fn normalize_connection_point(entry: &Value) -> Value {
    let Some(map) = entry.as_object() else {
        return Value::Object(Map::from_iter([("interface".to_string(), entry.clone())]));
    };
    if map.len() == 1 {
        if let Some((key, value)) = map.iter().next() {
            if !CONNECTION_FIELDS.contains(&key.as_str()) {
                let mut point = Map::new();
                if key == "host" {
                    point.insert("relation".into(), Value::String("host".into()));
                    point.insert("resource_type".into(), Value::String("compute".into()));
                } else {
                    point.insert("resource_type".into(), Value::String(key.clone()));
                }
                point.insert("interface".into(), value.clone());
                return Value::Object(point);
            }
        }
    }
    let mut point = map.clone();
    if let Some(resource_type) = point.remove("type") {
        point.entry("resource_type").or_insert(resource_type);
    }
    Value::Object(point)
}

fn connection_key(point: &Value, kind: &str) -> String {
    let text = |key: &str| point.get(key).and_then(Value::as_str);
    if kind == "requires" && text("relation") == Some("host") {
        return "host".to_string();
    }
    match (text("resource_type"), text("interface")) {
        (Some(resource_type), Some(interface)) => format!("{}:{}", resource_type, interface),
        (Some(resource_type), None) => resource_type.to_string(),
        (None, Some(interface)) => interface.to_string(),
        (None, None) => kind.to_string(),
    }
}

/// Keys connection point entries as `resource_type:interface` (`host` for
/// host requirements). Mappings are returned as they are.
pub fn connection_points(entries: Option<&Value>, kind: &str) -> Map<String, Value> {
    match entries {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(list)) => {
            let mut points = Map::new();
            for entry in list {
                let point = normalize_connection_point(entry);
                let base = connection_key(&point, kind);
                let mut key = base.clone();
                let mut counter = 2;
                while points.contains_key(&key) {
                    key = format!("{}#{}", base, counter);
                    counter += 1;
                }
                points.insert(key, point);
            }
            points
        }
        _ => Map::new(),
    }
}
