//! RPC payload messages, one struct per payload type.
//!
//! The envelope's `payloadtype` selects the message; the payload itself is
//! the base64-encoded JSON of one of these structs. Field names follow the
//! wire protocol (lower-case, no separators).

use serde::{Deserialize, Serialize};

use crate::domains::colony::Colony;
use crate::domains::executor::Executor;
use crate::domains::files::ColonyFile;
use crate::domains::generator::Generator;
use crate::domains::process::{Attribute, FunctionSpec};
use crate::domains::user::User;
use crate::domains::workflow::WorkflowSpec;

// Colonies

pub const ADD_COLONY: &str = "addcolonymsg";
pub const REMOVE_COLONY: &str = "removecolonymsg";
pub const GET_COLONY: &str = "getcolonymsg";
pub const GET_COLONIES: &str = "getcoloniesmsg";
pub const COLONY_STATISTICS: &str = "colonystatisticsmsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddColonyMsg {
    pub colony: Colony,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveColonyMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetColonyMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetColoniesMsg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColonyStatisticsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

// Executors

pub const ADD_EXECUTOR: &str = "addexecutormsg";
pub const GET_EXECUTOR: &str = "getexecutormsg";
pub const GET_EXECUTORS: &str = "getexecutorsmsg";
pub const APPROVE_EXECUTOR: &str = "approveexecutormsg";
pub const REJECT_EXECUTOR: &str = "rejectexecutormsg";
pub const REMOVE_EXECUTOR: &str = "removeexecutormsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddExecutorMsg {
    pub executor: Executor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetExecutorMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executorname")]
    pub executor_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetExecutorsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveExecutorMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executorname")]
    pub executor_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectExecutorMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executorname")]
    pub executor_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveExecutorMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executorname")]
    pub executor_name: String,
}

// Users

pub const ADD_USER: &str = "addusermsg";
pub const GET_USER: &str = "getusermsg";
pub const GET_USERS: &str = "getusersmsg";
pub const REMOVE_USER: &str = "removeusermsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserMsg {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUsersMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveUserMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    pub name: String,
}

// Processes

pub const SUBMIT_FUNCTION_SPEC: &str = "submitfuncspecmsg";
pub const SUBMIT_WORKFLOW_SPEC: &str = "submitworkflowspecmsg";
pub const ASSIGN_PROCESS: &str = "assignprocessmsg";
pub const CLOSE_SUCCESSFUL: &str = "closesuccessfulmsg";
pub const CLOSE_FAILED: &str = "closefailedmsg";
pub const GET_PROCESS: &str = "getprocessmsg";
pub const GET_PROCESSES: &str = "getprocessesmsg";
pub const REMOVE_PROCESS: &str = "removeprocessmsg";
pub const GET_PROCESSGRAPH: &str = "getprocessgraphmsg";
pub const GET_PROCESSGRAPHS: &str = "getprocessgraphsmsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFunctionSpecMsg {
    pub spec: FunctionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkflowSpecMsg {
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignProcessMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    /// Long-poll timeout in seconds; <= 0 returns immediately.
    #[serde(default)]
    pub timeout: i64,
    #[serde(rename = "availablecpu", default)]
    pub available_cpu: String,
    #[serde(rename = "availablemem", default)]
    pub available_memory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSuccessfulMsg {
    #[serde(rename = "processid")]
    pub process_id: String,
    #[serde(default)]
    pub out: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseFailedMsg {
    #[serde(rename = "processid")]
    pub process_id: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProcessMsg {
    #[serde(rename = "processid")]
    pub process_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProcessesMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(default = "default_count")]
    pub count: i64,
    #[serde(default)]
    pub state: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveProcessMsg {
    #[serde(rename = "processid")]
    pub process_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProcessGraphMsg {
    #[serde(rename = "processgraphid")]
    pub processgraph_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProcessGraphsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(default = "default_count")]
    pub count: i64,
    #[serde(default = "default_any_state")]
    pub state: i32,
}

// Attributes

pub const ADD_ATTRIBUTE: &str = "addattributemsg";
pub const GET_ATTRIBUTE: &str = "getattributemsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAttributeMsg {
    pub attribute: Attribute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttributeMsg {
    #[serde(rename = "attributeid")]
    pub attribute_id: String,
}

// Generators

pub const ADD_GENERATOR: &str = "addgeneratormsg";
pub const GET_GENERATOR: &str = "getgeneratormsg";
pub const GET_GENERATORS: &str = "getgeneratorsmsg";
pub const PACK_GENERATOR: &str = "packgeneratormsg";
pub const REMOVE_GENERATOR: &str = "removegeneratormsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddGeneratorMsg {
    pub generator: Generator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGeneratorMsg {
    #[serde(rename = "generatorid")]
    pub generator_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGeneratorsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(default = "default_count")]
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackGeneratorMsg {
    #[serde(rename = "generatorid")]
    pub generator_id: String,
    pub arg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveGeneratorMsg {
    #[serde(rename = "generatorid")]
    pub generator_id: String,
}

// Files and snapshots

pub const ADD_FILE: &str = "addfilemsg";
pub const GET_FILE: &str = "getfilemsg";
pub const GET_FILES: &str = "getfilesmsg";
pub const GET_FILE_LABELS: &str = "getfilelabelsmsg";
pub const REMOVE_FILE: &str = "removefilemsg";
pub const ADD_SNAPSHOT: &str = "addsnapshotmsg";
pub const GET_SNAPSHOT: &str = "getsnapshotmsg";
pub const GET_SNAPSHOTS: &str = "getsnapshotsmsg";
pub const REMOVE_SNAPSHOT: &str = "removesnapshotmsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFileMsg {
    pub file: ColonyFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "fileid", default)]
    pub file_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFilesMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileLabelsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFileMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "fileid", default)]
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSnapshotMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSnapshotMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "snapshotid", default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSnapshotsMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveSnapshotMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(default)]
    pub name: String,
}

// Subscriptions

pub const SUBSCRIBE_PROCESS: &str = "subscribeprocessmsg";
pub const SUBSCRIBE_PROCESSES: &str = "subscribeprocessesmsg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeProcessMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "processid")]
    pub process_id: String,
    #[serde(rename = "executortype", default)]
    pub executor_type: String,
    pub state: i32,
    #[serde(default)]
    pub timeout: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeProcessesMsg {
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executortype", default)]
    pub executor_type: String,
    pub state: i32,
    #[serde(default)]
    pub timeout: i64,
}

fn default_count() -> i64 {
    100
}

fn default_any_state() -> i32 {
    -1
}
