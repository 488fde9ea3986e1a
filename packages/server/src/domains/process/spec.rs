//! Function specifications: immutable declarations of what to run and where.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::ServerError;
use crate::domains::executor::Gpu;

/// Resource and placement constraints for a process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    /// Node names this spec depends on within a workflow.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub nodes: i32,
    #[serde(default)]
    pub cpu: String,
    #[serde(rename = "processespernode", default)]
    pub processes_per_node: i32,
    #[serde(rename = "mem", default)]
    pub memory: String,
    #[serde(default)]
    pub storage: String,
    #[serde(default)]
    pub gpu: Gpu,
    #[serde(default)]
    pub walltime: i64,
}

/// A filesystem sync directive: mount the files under a label into a
/// directory on the executor before the process runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncDirective {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub dir: String,
    #[serde(rename = "keeplocal", default)]
    pub keep_local: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    #[serde(rename = "nodename", default)]
    pub node_name: String,
    #[serde(rename = "funcname", default)]
    pub func_name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(rename = "colonyname", default)]
    pub colony_name: String,
    /// Explicit target executors; empty or `["*"]` means any executor.
    #[serde(rename = "executorids", default)]
    pub executor_ids: Vec<String>,
    #[serde(rename = "executortype", default)]
    pub executor_type: String,
    /// Seconds a process may stay WAITING; <= 0 means forever.
    #[serde(rename = "maxwaittime", default)]
    pub max_wait_time: i64,
    /// Seconds a process may stay RUNNING; <= 0 means forever.
    #[serde(rename = "maxexectime", default = "default_unbounded")]
    pub max_exec_time: i64,
    /// Retry budget on exec timeout; -1 means unbounded.
    #[serde(rename = "maxretries", default)]
    pub max_retries: i32,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub fs: Vec<SyncDirective>,
}

fn default_unbounded() -> i64 {
    -1
}

impl FunctionSpec {
    /// Validate a spec at submission time.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.colony_name.is_empty() {
            return Err(ServerError::Validation(
                "function spec has no colony name".to_string(),
            ));
        }
        if self.func_name.is_empty() {
            return Err(ServerError::Validation(
                "function spec has no function name".to_string(),
            ));
        }
        Ok(())
    }

    /// Target executor IDs as stored: an empty list widens to `["*"]`.
    pub fn target_executor_ids(&self) -> Vec<String> {
        if self.executor_ids.is_empty() {
            vec!["*".to_string()]
        } else {
            self.executor_ids.clone()
        }
    }
}
