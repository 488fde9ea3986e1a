//! Workflow specifications: an ordered list of function specs whose
//! `nodename`s reference each other through `conditions.dependencies`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::common::ServerError;
use crate::domains::process::FunctionSpec;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(rename = "colonyname", default)]
    pub colony_name: String,
    #[serde(rename = "functionspecs", default)]
    pub function_specs: Vec<FunctionSpec>,
}

impl WorkflowSpec {
    pub fn parse(json: &str) -> Result<Self, ServerError> {
        let spec: WorkflowSpec = serde_json::from_str(json)?;
        Ok(spec)
    }

    /// Validate node naming, dependency references and acyclicity.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.colony_name.is_empty() {
            return Err(ServerError::Validation(
                "workflow spec has no colony name".to_string(),
            ));
        }
        if self.function_specs.is_empty() {
            return Err(ServerError::Validation(
                "workflow spec has no function specs".to_string(),
            ));
        }

        let mut nodes = HashSet::new();
        for spec in &self.function_specs {
            if spec.node_name.is_empty() {
                return Err(ServerError::Validation(
                    "workflow function spec has no node name".to_string(),
                ));
            }
            if !nodes.insert(spec.node_name.as_str()) {
                return Err(ServerError::Validation(format!(
                    "duplicate node name <{}> in workflow",
                    spec.node_name
                )));
            }
        }

        for spec in &self.function_specs {
            for dep in &spec.conditions.dependencies {
                if !nodes.contains(dep.as_str()) {
                    return Err(ServerError::Validation(format!(
                        "node <{}> depends on undeclared node <{}>",
                        spec.node_name, dep
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    /// Depth-first three-color cycle detection over the dependency edges.
    fn check_acyclic(&self) -> Result<(), ServerError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let deps: HashMap<&str, &[String]> = self
            .function_specs
            .iter()
            .map(|s| (s.node_name.as_str(), s.conditions.dependencies.as_slice()))
            .collect();
        let mut marks: HashMap<&str, Mark> =
            deps.keys().map(|&n| (n, Mark::White)).collect();

        fn visit<'a>(
            node: &'a str,
            deps: &HashMap<&'a str, &'a [String]>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), ServerError> {
            match marks[node] {
                Mark::Black => return Ok(()),
                Mark::Gray => {
                    return Err(ServerError::Validation(format!(
                        "workflow contains a cycle through node <{node}>"
                    )))
                }
                Mark::White => {}
            }
            marks.insert(node, Mark::Gray);
            for dep in deps[node] {
                visit(dep.as_str(), deps, marks)?;
            }
            marks.insert(node, Mark::Black);
            Ok(())
        }

        for spec in &self.function_specs {
            visit(spec.node_name.as_str(), &deps, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(nodes: &[(&str, &[&str])]) -> WorkflowSpec {
        let function_specs = nodes
            .iter()
            .map(|(name, deps)| {
                serde_json::from_value(serde_json::json!({
                    "nodename": name,
                    "funcname": "echo",
                    "colonyname": "dev",
                    "conditions": {"dependencies": deps}
                }))
                .unwrap()
            })
            .collect();
        WorkflowSpec {
            colony_name: "dev".to_string(),
            function_specs,
        }
    }

    #[test]
    fn test_valid_diamond() {
        let spec = workflow(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let spec = workflow(&[("a", &["ghost"])]);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared"));
    }

    #[test]
    fn test_cycle_rejected() {
        let spec = workflow(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let spec = workflow(&[("a", &["a"])]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let spec = workflow(&[("a", &[]), ("a", &[])]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let spec = WorkflowSpec {
            colony_name: "dev".to_string(),
            function_specs: vec![],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_parse_wire_format() {
        let spec = WorkflowSpec::parse(
            r#"{"colonyname":"dev","functionspecs":[
                {"nodename":"gen","funcname":"generate","colonyname":"dev"},
                {"nodename":"sum","funcname":"reduce","colonyname":"dev",
                 "conditions":{"dependencies":["gen"]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(spec.function_specs.len(), 2);
        assert!(spec.validate().is_ok());
    }
}
