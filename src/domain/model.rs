use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// A relation from one service to another, as docker-compose links them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub service: String,
    pub interface: String,
}

/// One row of a plan exported as CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedResource {
    pub index: String,
    pub service: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub provider: String,
    pub component: String,
    pub dns_name: String,
    pub status: String,
    pub hosted_on: String,
}

impl PlannedResource {
    pub fn from_resource(index: &str, resource: &Value) -> Self {
        let field = |key: &str| {
            resource
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            index: index.to_string(),
            service: field("service"),
            resource_type: field("type"),
            provider: field("provider"),
            component: field("component"),
            dns_name: field("dns-name"),
            status: field("status"),
            hosted_on: field("hosted_on"),
        }
    }
}

/// What a docker run left on disk.
#[derive(Debug, Clone, Default)]
pub struct DockerArtifacts {
    pub workdir: PathBuf,
    pub compose_file: PathBuf,
    /// service name -> Dockerfile path
    pub dockerfiles: IndexMap<String, PathBuf>,
    pub bundle: Option<PathBuf>,
    pub launched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_planned_resource_from_resource() {
        let row = PlannedResource::from_resource(
            "0",
            &json!({
                "type": "database",
                "service": "db",
                "provider": "docker",
                "component": "docker_mysql",
                "dns-name": "db.checkmate.local",
                "status": "PLANNED",
            }),
        );
        assert_eq!(row.resource_type, "database");
        assert_eq!(row.dns_name, "db.checkmate.local");
        assert_eq!(row.hosted_on, "");
    }
}
