//! Checkmatefile loading: YAML/JSON text in, validated document out.

use crate::core::schema::{self, Invalid, Schema};
use crate::utils::error::Result;
use crate::utils::helpers::yaml_to_dict;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// All validation failures of a document, rendered one per line as
/// `['blueprint']['name']: required key not provided`.
#[derive(Error, Clone)]
#[error("{message}")]
pub struct MultiValidationError {
    pub errors: Vec<Invalid>,
    pub message: String,
}

impl MultiValidationError {
    pub fn new(errors: Vec<Invalid>) -> Self {
        let mut lines: Vec<String> = errors.iter().map(|error| error.to_string()).collect();
        lines.sort();
        Self {
            message: lines.join("\n"),
            errors,
        }
    }
}

impl fmt::Debug for MultiValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self
            .message
            .split('\n')
            .map(|line| format!("\t{}", line))
            .collect();
        lines.sort();
        write!(f, "MultiValidationError(\n{}\n)", lines.join("\n"))
    }
}

/// Parses `contents` and validates it against `schema`, returning the
/// normalized document.
pub fn load(contents: &str, schema: &Schema) -> Result<Value> {
    let data = yaml_to_dict(contents)?;
    match schema.validate(&data) {
        Ok(validated) => Ok(validated),
        Err(errors) => {
            debug!("Document failed validation with {} error(s)", errors.len());
            Err(MultiValidationError::new(errors).into())
        }
    }
}

pub fn load_checkmatefile(contents: &str) -> Result<Value> {
    load(contents, &schema::checkmatefile_schema())
}

pub fn load_component(contents: &str) -> Result<Value> {
    load(contents, &schema::component_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Field;
    use crate::utils::error::ChessboardError;

    fn expect_validation(result: Result<Value>) -> MultiValidationError {
        match result {
            Err(ChessboardError::MultiValidation(mve)) => mve,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_formatting() {
        let schema = Schema::mapping(vec![Field::required(
            "blueprint",
            Schema::mapping(vec![
                Field::required("id", Schema::Str),
                Field::required("name", Schema::Str),
                Field::optional("description", Schema::Str),
            ]),
        )]);
        let mve = expect_validation(load("blueprint:\n    id: def456\ninputs: {}\n", &schema));

        let expected = "['blueprint']['name']: required key not provided\n['inputs']: extra keys not allowed";
        assert_eq!(mve.to_string(), expected);
        assert_eq!(mve.message, expected);
        assert_eq!(
            format!("{:?}", mve),
            "MultiValidationError(\n\t['blueprint']['name']: required key not provided\n\t['inputs']: extra keys not allowed\n)"
        );
    }

    #[test]
    fn test_valid_checkmatefile() {
        let contents = r#"
blueprint:
  id: 8363F2D2284D4871BC618E92D152994F
  name: "magentostack-cloud"
  description: "Magento install with Cloud Databases."
  version: 1.0.0
  services:
    lb:
      component:
        interface: http
        resource_type: load-balancer
        constraints:
        - algorithm: ROUND_ROBIN
      relations:
      - service: magento
        interface: http
      - magento-worker: http
      display-name: Load Balancer
    magento:
      component:
        name: magento
        resource_type: application
        interface: http
        role: master
      constraints:
      - setting: count
        value: 1
      - setting: disk
        value: 50
    magento-worker:
      component:
        name: magento
        resource_type: application
        interface: http
        role: worker
      constraints:
      - setting: count
        greater-than-or-equal-to: 0
        less-than: 9
"#;
        let parsed = load_checkmatefile(contents).unwrap();
        let relations = &parsed["blueprint"]["services"]["lb"]["relations"];
        assert_eq!(relations[1]["service"], "magento-worker");
        assert_eq!(relations[1]["interface"], "http");
        let count = &parsed["blueprint"]["services"]["magento-worker"]["constraints"][0];
        assert_eq!(count["less-than"], "9");
    }

    #[test]
    fn test_invalid_checkmatefile() {
        let mve = expect_validation(load_checkmatefile("blueprint: {}\ntest: asfsfas\n"));
        assert_eq!(
            mve.message,
            "['blueprint']['services']: required key not provided\n['test']: extra keys not allowed"
        );
    }

    #[test]
    fn test_numeric_blueprint_id_not_allowed() {
        for invalid_id in ["100", "0x0", "1.5"] {
            let contents = format!(
                "blueprint:\n  id: {}\n  name: test\n  services: {{}}\n  version: 0.0.1\n",
                invalid_id
            );
            let mve = expect_validation(load_checkmatefile(&contents));
            assert_eq!(mve.to_string(), "['blueprint']['id']: expected str");
        }
    }

    #[test]
    fn test_relations_must_be_a_list() {
        let contents = "blueprint:\n  services:\n    foo:\n      relations:\n        not-list: But it should be\n";
        let mve = expect_validation(load_checkmatefile(contents));
        let error = mve
            .errors
            .iter()
            .find(|error| error.msg == "expected a list")
            .unwrap();
        assert_eq!(
            error.path_string(),
            "['blueprint']['services']['foo']['relations']"
        );
    }

    #[test]
    fn test_errors_carry_docs() {
        let contents = "blueprint:\n  services:\n    lb:\n      constraints:\n      - foo: []\n";
        let mve = expect_validation(load_checkmatefile(contents));
        assert!(mve.errors.len() >= 3);
        assert!(mve.errors.iter().all(|error| error.docs.is_some()));
    }

    #[test]
    fn test_external_anchor_reference() {
        let contents = "blueprint:\n  services: {}\n  options:\n    region: *region\n";
        let parsed = load_checkmatefile(contents).unwrap();
        assert_eq!(parsed["blueprint"]["options"]["region"], "ref://region");
    }

    #[test]
    fn test_asterisks_in_text_are_not_references() {
        let contents = "blueprint:\n  services: {}\n  description: 'Deploys *wordpress'\n  documentation:\n    abstract: |\n      Use *emphasis* and &more\n";
        let parsed = load_checkmatefile(contents).unwrap();
        assert_eq!(parsed["blueprint"]["description"], "Deploys *wordpress");
        assert_eq!(
            parsed["blueprint"]["documentation"]["abstract"],
            "Use *emphasis* and &more\n"
        );
    }
}
