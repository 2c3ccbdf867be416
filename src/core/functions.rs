//! Blueprint functions.
//!
//! Mappings keyed by `if`, `if-not`, `or`, `and`, `value`, `exists` or
//! `not-exists` are evaluated against named sources such as `resources`,
//! `inputs` or `deployment`. Values may be URIs (`resources://0/instance/ip`)
//! or references into the pattern library (`patterns.regex.linux_user.required`).

use crate::utils::error::{ChessboardError, Result};
use crate::utils::helpers::{self, escape_yaml_simple_string, read_path};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Resolves a setting name to its value.
pub type SettingsResolver<'a> = Box<dyn Fn(&str) -> Result<Value> + 'a>;

const FUNCTION_KEYS: &[&str] = &["if", "if-not", "or", "and", "value", "exists", "not-exists"];

/// Named sources that URIs resolve against.
#[derive(Default)]
pub struct FunctionContext<'a> {
    sources: HashMap<String, &'a Value>,
    settings: Option<SettingsResolver<'a>>,
}

impl<'a> FunctionContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every top-level key of `document` as a source.
    pub fn from_document(document: &'a Value) -> Self {
        let mut context = Self::new();
        if let Some(map) = document.as_object() {
            for (key, value) in map {
                context.sources.insert(key.clone(), value);
            }
        }
        context
    }

    pub fn with(mut self, scheme: &str, source: &'a Value) -> Self {
        self.sources.insert(scheme.to_string(), source);
        self
    }

    pub fn with_settings(mut self, resolver: SettingsResolver<'a>) -> Self {
        self.settings = Some(resolver);
        self
    }

    pub fn source(&self, scheme: &str) -> Option<&'a Value> {
        self.sources.get(scheme).copied()
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &'a Value)> + '_ {
        self.sources
            .iter()
            .map(|(scheme, source)| (scheme.as_str(), *source))
    }

    /// Value of a setting. Without a resolver the `defaults` source is used.
    pub fn setting(&self, name: &str) -> Result<Value> {
        match &self.settings {
            Some(resolver) => resolver(name),
            None => {
                let default = self
                    .source("defaults")
                    .and_then(|defaults| defaults.get(name))
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                eval_blueprint_fxn(&escape_yaml_simple_string(&default))
            }
        }
    }
}

/// The pattern library as `{patterns: ...}`.
pub fn patterns() -> &'static Value {
    static PATTERNS: OnceLock<Value> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let library: Value =
            serde_yaml::from_str(include_str!("patterns.yaml")).unwrap_or(Value::Null);
        json!({ "patterns": library })
    })
}

pub fn evaluate(obj: &Value, context: &FunctionContext<'_>) -> Result<Value> {
    match obj {
        Value::Object(map) => {
            for (key, value) in map {
                if !FUNCTION_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let value = evaluate(value, context)?;
                let result = match key.as_str() {
                    "if" => Value::Bool(!is_false_or_none(&value)),
                    "if-not" => Value::Bool(is_false_or_none(&value)),
                    "or" => Value::Bool(items(&value).any(is_truthy)),
                    "and" => Value::Bool(items(&value).all(is_truthy)),
                    "value" => get_value(&value, context)?,
                    "exists" => Value::Bool(path_exists(&value, context)),
                    _ => Value::Bool(!path_exists(&value, context)),
                };
                return Ok(result);
            }
            Ok(obj.clone())
        }
        Value::Array(list) => list
            .iter()
            .map(|item| evaluate(item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => Ok(obj.clone()),
    }
}

fn items(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(list) => Box::new(list.iter()),
        Value::Object(map) => Box::new(map.values()),
        other => Box::new(std::iter::once(other)),
    }
}

// `0 == False` holds for the blueprint language too
fn is_false_or_none(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Number(number) => number.as_f64() == Some(0.0),
        _ => false,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64() != Some(0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Parses a `value` entry.
pub fn get_value(value: &Value, context: &FunctionContext<'_>) -> Result<Value> {
    if is_uri(value) {
        get_from_path(value, context)
    } else if is_pattern(value) {
        get_pattern(value.as_str().unwrap_or_default(), patterns())
    } else {
        Ok(value.clone())
    }
}

fn split_scheme(text: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = text.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
    valid.then_some((scheme, rest))
}

fn combined_path(rest: &str) -> String {
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    rest.replace("//", "/").trim_matches('/').to_string()
}

pub fn is_uri(value: &Value) -> bool {
    value
        .as_str()
        .and_then(split_scheme)
        .is_some()
}

pub fn is_pattern(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|text| text.starts_with("patterns.") && !text.ends_with('.'))
}

/// Finds a value using URI syntax. Unknown schemes return the input unchanged.
pub fn get_from_path(path: &Value, context: &FunctionContext<'_>) -> Result<Value> {
    let Some((scheme, rest)) = path.as_str().and_then(split_scheme) else {
        return Ok(path.clone());
    };
    let combined = combined_path(rest);
    if scheme == "settings" {
        let value = context.setting(&combined)?;
        let mut focus = Map::new();
        focus.insert(combined.clone(), value);
        let focus = Value::Object(focus);
        if combined.is_empty() {
            return Ok(focus);
        }
        return Ok(read_path(&focus, &combined).cloned().unwrap_or(Value::Null));
    }
    let Some(focus) = context.source(scheme) else {
        debug!("No source registered for '{}'", scheme);
        return Ok(path.clone());
    };
    if combined.is_empty() {
        return Ok(focus.clone());
    }
    Ok(read_path(focus, &combined).cloned().unwrap_or(Value::Null))
}

/// Checks a value exists using URI syntax.
pub fn path_exists(path: &Value, context: &FunctionContext<'_>) -> bool {
    let Some((scheme, rest)) = path.as_str().and_then(split_scheme) else {
        return false;
    };
    let Some(focus) = context.source(scheme) else {
        return false;
    };
    let combined = combined_path(rest);
    !combined.is_empty() && helpers::path_exists(focus, &combined)
}

/// Looks up `patterns.x.y` in `library` and returns its `value` entry.
pub fn get_pattern(value: &str, library: &Value) -> Result<Value> {
    let pattern = read_path(library, &value.replace('.', "/"));
    match pattern {
        None => Err(ChessboardError::DoesNotExist(format!(
            "Pattern '{}' does not exist",
            value
        ))),
        Some(Value::Object(map)) => map.get("value").cloned().ok_or_else(|| {
            ChessboardError::general(format!("Pattern is missing 'value' entry: {}", value))
        }),
        Some(_) => Err(ChessboardError::general(format!(
            "Pattern is not in valid format: {}",
            value
        ))),
    }
}

/// Evaluates the values of a mapping.
pub fn parse(obj: &Value, context: &FunctionContext<'_>) -> Result<Value> {
    match obj {
        Value::Object(map) => {
            let mut parsed = Map::with_capacity(map.len());
            for (key, value) in map {
                parsed.insert(key.clone(), evaluate(value, context)?);
            }
            Ok(Value::Object(parsed))
        }
        _ => Ok(obj.clone()),
    }
}

/// Handles defaults written as `=generate_...` calls.
pub fn eval_blueprint_fxn(value: &Value) -> Result<Value> {
    match value.as_str() {
        Some(text) if text.starts_with("=generate") => helpers::evaluate(&text[1..]),
        _ => Ok(value.clone()),
    }
}
