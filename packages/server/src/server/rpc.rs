//! RPC envelope and dispatch.
//!
//! Every request is `{payloadtype, payload, signature}` where `payload` is
//! the base64 of a JSON message and `signature` a recoverable signature
//! over the raw payload bytes. The caller's identity is whatever ID the
//! signature recovers to; handlers decide what that identity may do.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{crypto, ServerError};
use crate::server::app::AppState;
use crate::server::handlers::{colony, executor, files, generator, process, subscription, user};
use crate::server::messages as msg;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadtype")]
    pub payload_type: String,
    pub payload: String,
    pub signature: String,
}

impl Envelope {
    /// Client-side construction: serialize, encode and sign a message.
    pub fn seal<T: Serialize>(
        payload_type: &str,
        message: &T,
        private_key_hex: &str,
    ) -> Result<Self, ServerError> {
        let json = serde_json::to_vec(message)?;
        let signature = crypto::sign_payload(&json, private_key_hex)?;
        Ok(Self {
            payload_type: payload_type.to_string(),
            payload: BASE64.encode(json),
            signature,
        })
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ServerError> {
    serde_json::from_slice(payload).map_err(Into::into)
}

/// Authenticate the envelope and route it to its handler.
pub async fn dispatch(
    state: &AppState,
    envelope: Envelope,
) -> Result<serde_json::Value, ServerError> {
    let payload = BASE64
        .decode(&envelope.payload)
        .map_err(|_| ServerError::Validation("payload is not valid base64".to_string()))?;
    let caller = crypto::recover_id(&payload, &envelope.signature)?;

    match envelope.payload_type.as_str() {
        msg::ADD_COLONY => colony::add_colony(state, &caller, parse(&payload)?).await,
        msg::REMOVE_COLONY => colony::remove_colony(state, &caller, parse(&payload)?).await,
        msg::GET_COLONY => colony::get_colony(state, &caller, parse(&payload)?).await,
        msg::GET_COLONIES => colony::get_colonies(state, &caller).await,
        msg::COLONY_STATISTICS => colony::colony_statistics(state, &caller, parse(&payload)?).await,

        msg::ADD_EXECUTOR => executor::add_executor(state, &caller, parse(&payload)?).await,
        msg::GET_EXECUTOR => executor::get_executor(state, &caller, parse(&payload)?).await,
        msg::GET_EXECUTORS => executor::get_executors(state, &caller, parse(&payload)?).await,
        msg::APPROVE_EXECUTOR => executor::approve_executor(state, &caller, parse(&payload)?).await,
        msg::REJECT_EXECUTOR => executor::reject_executor(state, &caller, parse(&payload)?).await,
        msg::REMOVE_EXECUTOR => executor::remove_executor(state, &caller, parse(&payload)?).await,

        msg::ADD_USER => user::add_user(state, &caller, parse(&payload)?).await,
        msg::GET_USER => user::get_user(state, &caller, parse(&payload)?).await,
        msg::GET_USERS => user::get_users(state, &caller, parse(&payload)?).await,
        msg::REMOVE_USER => user::remove_user(state, &caller, parse(&payload)?).await,

        msg::SUBMIT_FUNCTION_SPEC => process::submit(state, &caller, parse(&payload)?).await,
        msg::SUBMIT_WORKFLOW_SPEC => process::submit_workflow(state, &caller, parse(&payload)?).await,
        msg::ASSIGN_PROCESS => process::assign(state, &caller, parse(&payload)?).await,
        msg::CLOSE_SUCCESSFUL => process::close_successful(state, &caller, parse(&payload)?).await,
        msg::CLOSE_FAILED => process::close_failed(state, &caller, parse(&payload)?).await,
        msg::GET_PROCESS => process::get_process(state, &caller, parse(&payload)?).await,
        msg::GET_PROCESSES => process::get_processes(state, &caller, parse(&payload)?).await,
        msg::REMOVE_PROCESS => process::remove_process(state, &caller, parse(&payload)?).await,
        msg::GET_PROCESSGRAPH => process::get_processgraph(state, &caller, parse(&payload)?).await,
        msg::GET_PROCESSGRAPHS => {
            process::get_processgraphs(state, &caller, parse(&payload)?).await
        }
        msg::ADD_ATTRIBUTE => process::add_attribute(state, &caller, parse(&payload)?).await,
        msg::GET_ATTRIBUTE => process::get_attribute(state, &caller, parse(&payload)?).await,

        msg::ADD_GENERATOR => generator::add_generator(state, &caller, parse(&payload)?).await,
        msg::GET_GENERATOR => generator::get_generator(state, &caller, parse(&payload)?).await,
        msg::GET_GENERATORS => generator::get_generators(state, &caller, parse(&payload)?).await,
        msg::PACK_GENERATOR => generator::pack_generator(state, &caller, parse(&payload)?).await,
        msg::REMOVE_GENERATOR => generator::remove_generator(state, &caller, parse(&payload)?).await,

        msg::ADD_FILE => files::add_file(state, &caller, parse(&payload)?).await,
        msg::GET_FILE => files::get_file(state, &caller, parse(&payload)?).await,
        msg::GET_FILES => files::get_files(state, &caller, parse(&payload)?).await,
        msg::GET_FILE_LABELS => files::get_file_labels(state, &caller, parse(&payload)?).await,
        msg::REMOVE_FILE => files::remove_file(state, &caller, parse(&payload)?).await,
        msg::ADD_SNAPSHOT => files::add_snapshot(state, &caller, parse(&payload)?).await,
        msg::GET_SNAPSHOT => files::get_snapshot(state, &caller, parse(&payload)?).await,
        msg::GET_SNAPSHOTS => files::get_snapshots(state, &caller, parse(&payload)?).await,
        msg::REMOVE_SNAPSHOT => files::remove_snapshot(state, &caller, parse(&payload)?).await,

        msg::SUBSCRIBE_PROCESS => {
            subscription::subscribe_process(state, &caller, parse(&payload)?).await
        }
        msg::SUBSCRIBE_PROCESSES => {
            subscription::subscribe_processes(state, &caller, parse(&payload)?).await
        }

        other => Err(ServerError::Validation(format!(
            "unknown payload type <{other}>"
        ))),
    }
}
