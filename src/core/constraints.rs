//! Constraint validation.
//!
//! A constraint is a mapping such as `{regex: ..., message: ...}` or
//! `{less-than: 8}`. [`Constraint::from_constraint`] evaluates any function
//! values and picks the first kind whose keys match.

use crate::core::functions::{self, is_truthy, FunctionContext};
use crate::utils::error::{ChessboardError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

const DEFAULT_MESSAGE: &str = "not explained";

const COMPARISON_KEYS: &[&str] = &[
    "less-than",
    "greater-than",
    "less-than-or-equal-to",
    "greater-than-or-equal-to",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessThan,
    GreaterThan,
    LessThanOrEqualTo,
    GreaterThanOrEqualTo,
}

impl Comparison {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "less-than" => Some(Self::LessThan),
            "greater-than" => Some(Self::GreaterThan),
            "less-than-or-equal-to" => Some(Self::LessThanOrEqualTo),
            "greater-than-or-equal-to" => Some(Self::GreaterThanOrEqualTo),
            _ => None,
        }
    }

    fn describe(&self, limit: &Value) -> String {
        let rule = match self {
            Self::LessThan => "less than",
            Self::GreaterThan => "greater than",
            Self::LessThanOrEqualTo => "less than or equal to",
            Self::GreaterThanOrEqualTo => "greater than or equal to",
        };
        format!("must be {} {}", rule, display(limit))
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::LessThan => ordering == Ordering::Less,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::LessThanOrEqualTo => ordering != Ordering::Greater,
            Self::GreaterThanOrEqualTo => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// An empty constraint; never passes.
    Unrestricted,
    Regex(Regex),
    Protocols(Vec<String>),
    In(Vec<Value>),
    SimpleComparison(Vec<(Comparison, Value)>),
    Static,
    MinLength(usize),
    MaxLength(usize),
    AllowedChars(String),
    RequiredChars(String),
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub message: String,
    pub constraint: Map<String, Value>,
}

struct Syntax {
    required: &'static [&'static str],
    allowed: &'static [&'static str],
    any_required: bool,
}

// Tried in this order
const SYNTAXES: &[(&str, Syntax)] = &[
    ("empty", Syntax { required: &[], allowed: &[], any_required: false }),
    ("in", Syntax { required: &["in"], allowed: &["in", "message"], any_required: false }),
    (
        "protocols",
        Syntax { required: &["protocols"], allowed: &["protocols", "message"], any_required: false },
    ),
    ("regex", Syntax { required: &["regex"], allowed: &["regex", "message"], any_required: false }),
    (
        "comparison",
        Syntax {
            required: COMPARISON_KEYS,
            allowed: &[
                "less-than",
                "greater-than",
                "less-than-or-equal-to",
                "greater-than-or-equal-to",
                "message",
            ],
            any_required: true,
        },
    ),
    ("check", Syntax { required: &["check"], allowed: &["check", "message"], any_required: false }),
    (
        "min-length",
        Syntax { required: &["min-length"], allowed: &["min-length", "message"], any_required: false },
    ),
    (
        "max-length",
        Syntax { required: &["max-length"], allowed: &["max-length", "message"], any_required: false },
    ),
    (
        "allowed-chars",
        Syntax {
            required: &["allowed-chars"],
            allowed: &["allowed-chars", "message"],
            any_required: false,
        },
    ),
    (
        "required-chars",
        Syntax {
            required: &["required-chars"],
            allowed: &["required-chars", "message"],
            any_required: false,
        },
    ),
];

impl Syntax {
    fn is_valid(&self, constraint: &Map<String, Value>) -> bool {
        if !constraint.keys().all(|key| self.allowed.contains(&key.as_str())) {
            return false;
        }
        if self.any_required {
            self.required.iter().any(|key| constraint.contains_key(*key))
        } else {
            self.required.iter().all(|key| constraint.contains_key(*key))
        }
    }
}

/// Whether `constraint` matches the syntax of the named kind.
pub fn is_syntax_valid(kind: &str, constraint: &Value) -> bool {
    let Some(map) = constraint.as_object() else {
        return false;
    };
    SYNTAXES
        .iter()
        .find(|(name, _)| *name == kind)
        .is_some_and(|(_, syntax)| syntax.is_valid(map))
}

fn not_valid(constraint: &Value) -> ChessboardError {
    ChessboardError::Validation(format!(
        "Constraint '{}' is not a valid constraint",
        constraint
    ))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn as_length(value: &Value, key: &str) -> Result<usize> {
    let length = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    length.map(|n| n as usize).ok_or_else(|| {
        ChessboardError::Validation(format!(
            "Constraint '{}' does not have a valid length: {}",
            key, value
        ))
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn compare(value: &Value, limit: &Value) -> Option<Ordering> {
    if let (Value::String(left), Value::String(right)) = (value, limit) {
        if as_number(value).is_none() || as_number(limit).is_none() {
            return Some(left.cmp(right));
        }
    }
    as_number(value)?.partial_cmp(&as_number(limit)?)
}

impl Constraint {
    /// Builds the constraint of the first kind matching `constraint` after
    /// evaluating its function values.
    pub fn from_constraint(constraint: &Value, context: &FunctionContext<'_>) -> Result<Self> {
        let parsed = functions::parse(constraint, context)?;
        for (kind, _) in SYNTAXES {
            if is_syntax_valid(kind, &parsed) {
                return Self::new(kind, &parsed);
            }
        }
        Err(not_valid(&parsed))
    }

    /// Wraps `constraint` as the named kind.
    pub fn new(kind: &str, constraint: &Value) -> Result<Self> {
        if !is_syntax_valid(kind, constraint) {
            return Err(not_valid(constraint));
        }
        let map = constraint.as_object().cloned().unwrap_or_default();
        let mut message = map
            .get("message")
            .map(display)
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

        let kind = match kind {
            "in" => match &map["in"] {
                Value::Array(allowed) => ConstraintKind::In(allowed.clone()),
                other => {
                    return Err(ChessboardError::Validation(format!(
                        "In constraint does not have a list of values supplied: {}",
                        other
                    )))
                }
            },
            "protocols" => match &map["protocols"] {
                Value::Array(protocols) => {
                    if map.get("message").map_or(true, |m| !is_truthy(m)) {
                        message = "invalid protocol".to_string();
                    }
                    ConstraintKind::Protocols(protocols.iter().map(display).collect())
                }
                other => {
                    return Err(ChessboardError::Validation(format!(
                        "Protocols constraint does not have a list of protocols supplied: {}",
                        other
                    )))
                }
            },
            "regex" => {
                let expression = display(&map["regex"]);
                let compiled = Regex::new(&expression).map_err(|_| {
                    ChessboardError::Validation(format!(
                        "Constraint has an invalid regular expression: {}",
                        expression
                    ))
                })?;
                ConstraintKind::Regex(compiled)
            }
            "comparison" => {
                let mut rules = Vec::new();
                let mut messages = Vec::new();
                for (key, limit) in &map {
                    if let Some(comparison) = Comparison::from_key(key) {
                        messages.push(comparison.describe(limit));
                        rules.push((comparison, limit.clone()));
                    }
                }
                if !map.contains_key("message") && !messages.is_empty() {
                    message = messages.join(", ");
                }
                ConstraintKind::SimpleComparison(rules)
            }
            "check" => ConstraintKind::Static,
            "min-length" => {
                let length = as_length(&map["min-length"], "min-length")?;
                if !map.contains_key("message") {
                    message = format!("must be at least {} characters long", length);
                }
                ConstraintKind::MinLength(length)
            }
            "max-length" => {
                let length = as_length(&map["max-length"], "max-length")?;
                if !map.contains_key("message") {
                    message = format!("must be at most {} characters long", length);
                }
                ConstraintKind::MaxLength(length)
            }
            "allowed-chars" => {
                let chars = display(&map["allowed-chars"]);
                if !map.contains_key("message") {
                    message = format!("can only contain the characters {}", chars);
                }
                ConstraintKind::AllowedChars(chars)
            }
            "required-chars" => {
                let chars = display(&map["required-chars"]);
                if !map.contains_key("message") {
                    message = format!("must contain at least one of the characters {}", chars);
                }
                ConstraintKind::RequiredChars(chars)
            }
            _ => ConstraintKind::Unrestricted,
        };

        Ok(Self {
            kind,
            message,
            constraint: map,
        })
    }

    /// Runs the constraint logic on `value`.
    pub fn test(&self, value: &Value) -> bool {
        match &self.kind {
            ConstraintKind::Unrestricted => false,
            ConstraintKind::Regex(expression) => match value {
                Value::String(_) | Value::Number(_) => {
                    let text = display(value);
                    // anchored at the start only
                    expression
                        .find(&text)
                        .is_some_and(|found| found.start() == 0)
                }
                _ => false,
            },
            ConstraintKind::Protocols(protocols) => value
                .as_str()
                .and_then(|text| text.split_once("://"))
                .is_some_and(|(protocol, _)| protocols.iter().any(|p| p == protocol)),
            ConstraintKind::In(allowed) => allowed
                .iter()
                .any(|candidate| candidate == value || display(candidate) == display(value)),
            ConstraintKind::SimpleComparison(rules) => rules.iter().all(|(comparison, limit)| {
                compare(value, limit).is_some_and(|ordering| comparison.holds(ordering))
            }),
            ConstraintKind::Static => self.constraint.get("check").is_some_and(is_truthy),
            ConstraintKind::MinLength(length) => {
                value.as_str().is_some_and(|text| text.chars().count() >= *length)
            }
            ConstraintKind::MaxLength(length) => {
                value.as_str().is_some_and(|text| text.chars().count() <= *length)
            }
            ConstraintKind::AllowedChars(chars) => value
                .as_str()
                .is_some_and(|text| text.chars().all(|c| chars.contains(c))),
            ConstraintKind::RequiredChars(chars) => value
                .as_str()
                .is_some_and(|text| text.chars().any(|c| chars.contains(c))),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
