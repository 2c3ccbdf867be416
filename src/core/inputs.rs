use serde_json::{Map, Number, Value};
use std::fmt;
use url::Url;

const URL_PARTS: &[&str] = &[
    "fragment", "hostname", "netloc", "params", "password", "path", "port", "query", "scheme",
    "username",
];

/// A deployment input value.
///
/// Inputs behave like their string (or number) value. Inputs supplied as a
/// mapping with a `url` key, or strings explicitly parsed with
/// [`Input::parse_url`], also expose the parts of the URL as attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Number(Number),
    Text {
        value: String,
        attributes: Map<String, Value>,
    },
}

impl Input {
    pub fn new(source: &Value) -> Self {
        match source {
            Value::Number(number) => Input::Number(number.clone()),
            Value::Object(map) => {
                let value = map
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut input = Input::Text {
                    value,
                    attributes: map.clone(),
                };
                input.parse_url();
                input
            }
            Value::String(text) => Input::Text {
                value: text.clone(),
                attributes: Map::new(),
            },
            Value::Bool(flag) => Input::Text {
                value: if *flag { "True" } else { "False" }.to_string(),
                attributes: Map::new(),
            },
            Value::Null => Input::Text {
                value: String::new(),
                attributes: Map::new(),
            },
            Value::Array(_) => Input::Text {
                value: source.to_string(),
                attributes: Map::new(),
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Input::Text { value, .. } => Some(value),
            Input::Number(_) => None,
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        match self {
            Input::Text { attributes, .. } => attributes.get(attribute),
            Input::Number(_) => None,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Input::Text { attributes, .. } if attributes.contains_key("url"))
    }

    /// Parses the value as a URL and sets any missing URL attributes.
    pub fn parse_url(&mut self) {
        let Input::Text { value, attributes } = self else {
            return;
        };
        let parts = split_url(value);
        for key in URL_PARTS {
            if !attributes.contains_key(*key) {
                attributes.insert(
                    key.to_string(),
                    parts.get(*key).cloned().unwrap_or(Value::Null),
                );
            }
        }
        if !attributes.contains_key("protocol") {
            let scheme = attributes.get("scheme").cloned().unwrap_or(Value::Null);
            attributes.insert("protocol".into(), scheme);
        }
        if !attributes.contains_key("url") {
            attributes.insert("url".into(), Value::String(value.clone()));
        }
        for key in ["certificate", "private_key", "intermediate_key"] {
            attributes.entry(key).or_insert(Value::Null);
        }
    }

    /// The plain value, or the full attribute mapping for URL inputs.
    pub fn to_value(&self) -> Value {
        match self {
            Input::Number(number) => Value::Number(number.clone()),
            Input::Text { value, attributes } if attributes.is_empty() => {
                Value::String(value.clone())
            }
            Input::Text { attributes, .. } => Value::Object(attributes.clone()),
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Number(number) => write!(f, "{}", number),
            Input::Text { value, .. } => write!(f, "{}", value),
        }
    }
}

/// Splits a URL into `scheme`, `netloc`, `hostname`, `port`, `path`,
/// `params`, `query`, `fragment`, `username` and `password`. The netloc and
/// port come from the text as written so default ports are kept.
pub fn split_url(text: &str) -> Map<String, Value> {
    let mut parts = Map::new();
    let empty = || Value::String(String::new());
    for key in ["scheme", "netloc", "path", "params", "query", "fragment"] {
        parts.insert(key.into(), empty());
    }
    for key in ["hostname", "port", "username", "password"] {
        parts.insert(key.into(), Value::Null);
    }

    let Ok(parsed) = Url::parse(text) else {
        parts.insert("path".into(), Value::String(text.to_string()));
        return parts;
    };

    parts.insert("scheme".into(), Value::String(parsed.scheme().to_string()));
    let rest = text
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let netloc_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let netloc = &rest[..netloc_end];
    parts.insert("netloc".into(), Value::String(netloc.to_string()));

    let host_port = netloc.rsplit_once('@').map(|(_, hp)| hp).unwrap_or(netloc);
    let port = host_port
        .rsplit_once(':')
        .filter(|(host, _)| !host.ends_with(']') || host.starts_with('['))
        .and_then(|(_, port)| port.parse::<u16>().ok());
    if let Some(port) = port {
        parts.insert("port".into(), Value::from(port));
    }
    if let Some(host) = parsed.host_str() {
        parts.insert("hostname".into(), Value::String(host.to_lowercase()));
    }
    if !parsed.username().is_empty() {
        parts.insert("username".into(), Value::String(parsed.username().to_string()));
    }
    if let Some(password) = parsed.password() {
        parts.insert("password".into(), Value::String(password.to_string()));
    }

    let after_netloc = &rest[netloc_end..];
    let path_end = after_netloc.find(['?', '#']).unwrap_or(after_netloc.len());
    parts.insert(
        "path".into(),
        Value::String(after_netloc[..path_end].to_string()),
    );
    if let Some(query) = parsed.query() {
        parts.insert("query".into(), Value::String(query.to_string()));
    }
    if let Some(fragment) = parsed.fragment() {
        parts.insert("fragment".into(), Value::String(fragment.to_string()));
    }
    parts
}
