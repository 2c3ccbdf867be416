//! Deployment targets.
//!
//! An environment names its providers by key (`docker`, `keys`); the
//! optional `class_name` of a provider entry picks the implementation when
//! the key alone does not.

pub mod base;
pub mod core_keys;
pub mod docker;

pub use base::{Provider, ProviderBase};

use crate::utils::error::{ChessboardError, Result};
use serde_json::Value;

/// Instantiates the provider registered under `key`.
pub fn get_provider(key: &str, definition: &Value) -> Result<Box<dyn Provider>> {
    let class_name = definition
        .get("class_name")
        .and_then(Value::as_str)
        .unwrap_or(key);
    let name = class_name
        .trim_start_matches("chessboard.providers.")
        .trim_end_matches(".Provider");
    match name {
        "docker" => Ok(Box::new(docker::DockerProvider::new(key, definition)?)),
        "core.keys" | "keys" | "core" => Ok(Box::new(core_keys::KeysProvider::new(key, definition)?)),
        other => Err(ChessboardError::DoesNotExist(format!(
            "No provider named '{}' is available",
            other
        ))),
    }
}
