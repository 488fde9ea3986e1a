use tracing::{debug, info};

use crate::common::ServerError;
use crate::domains::process::{Attribute, AttributeType, Process, ProcessState};
use crate::domains::workflow::{runtime, ProcessGraph};
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::{require_member_or_owner, HandlerResult};
use crate::server::messages::{
    AddAttributeMsg, AssignProcessMsg, CloseFailedMsg, CloseSuccessfulMsg, GetAttributeMsg,
    GetProcessGraphMsg, GetProcessGraphsMsg, GetProcessMsg, GetProcessesMsg, RemoveProcessMsg,
    SubmitFunctionSpecMsg, SubmitWorkflowSpecMsg,
};

pub async fn submit(state: &AppState, caller: &str, msg: SubmitFunctionSpecMsg) -> HandlerResult {
    msg.spec.validate()?;
    let initiator = security::require_member(caller, &msg.spec.colony_name, &state.pool).await?;

    let mut process = Process::from_spec(msg.spec, &initiator.id, &initiator.name);
    process.insert(&state.pool).await?;
    process.load_attributes(&state.pool).await?;

    debug!(process_id = %process.id, colony_name = %process.colony_name(), "process submitted");
    state.events.publish(&process, ProcessState::Waiting).await;
    Ok(serde_json::to_value(process)?)
}

pub async fn submit_workflow(
    state: &AppState,
    caller: &str,
    msg: SubmitWorkflowSpecMsg,
) -> HandlerResult {
    let initiator = security::require_member(caller, &msg.spec.colony_name, &state.pool).await?;

    let (graph, processes) =
        runtime::materialize(&msg.spec, &[], &initiator.id, &initiator.name, &state.pool).await?;
    state.events.publish_new_waiting(&processes).await;

    info!(
        processgraph_id = %graph.id,
        colony_name = %graph.colony_name,
        "workflow submitted"
    );
    Ok(serde_json::to_value(graph)?)
}

pub async fn assign(state: &AppState, caller: &str, msg: AssignProcessMsg) -> HandlerResult {
    let executor =
        security::require_approved_executor(caller, &msg.colony_name, &state.pool).await?;

    let assigned = state
        .assignment
        .assign(
            &msg.colony_name,
            &executor,
            &msg.available_cpu,
            &msg.available_memory,
            msg.timeout,
        )
        .await?;

    match assigned {
        Some(process) => Ok(serde_json::to_value(process)?),
        None => Err(ServerError::NotFound(format!(
            "no process can be assigned to executor <{}>",
            executor.name
        ))),
    }
}

pub async fn close_successful(
    state: &AppState,
    caller: &str,
    msg: CloseSuccessfulMsg,
) -> HandlerResult {
    let process = find(state, &msg.process_id).await?;
    if process.state != ProcessState::Running {
        return Err(ServerError::Conflict(format!(
            "process <{}> is not running, cannot close it",
            process.id
        )));
    }
    if process.assigned_executor_id != caller {
        return Err(ServerError::Forbidden(
            "only the assigned executor may close a process".to_string(),
        ));
    }

    if !msg.out.is_empty() {
        Attribute::new(
            &process.id,
            &process.spec.colony_name,
            AttributeType::Out,
            "output",
            &serde_json::to_string(&msg.out)?,
        )
        .insert(&state.pool)
        .await?;
    }

    Process::close(&process.id, ProcessState::Success, &state.pool).await?;
    info!(process_id = %process.id, "process closed as successful");

    state.events.publish(&process, ProcessState::Success).await;
    let outcome = runtime::on_process_closed(&process, ProcessState::Success, &state.pool).await?;
    state.events.publish_outcome(&outcome).await;
    Ok(serde_json::json!({}))
}

pub async fn close_failed(state: &AppState, caller: &str, msg: CloseFailedMsg) -> HandlerResult {
    let process = find(state, &msg.process_id).await?;
    if process.state != ProcessState::Running {
        return Err(ServerError::Conflict(format!(
            "process <{}> is not running, cannot close it",
            process.id
        )));
    }
    if process.assigned_executor_id != caller {
        return Err(ServerError::Forbidden(
            "only the assigned executor may close a process".to_string(),
        ));
    }

    if !msg.errors.is_empty() {
        Attribute::new(
            &process.id,
            &process.spec.colony_name,
            AttributeType::Err,
            "error",
            &msg.errors.join("; "),
        )
        .insert(&state.pool)
        .await?;
    }

    Process::close(&process.id, ProcessState::Failed, &state.pool).await?;
    info!(process_id = %process.id, "process closed as failed");

    state.events.publish(&process, ProcessState::Failed).await;
    let outcome = runtime::on_process_closed(&process, ProcessState::Failed, &state.pool).await?;
    state.events.publish_outcome(&outcome).await;
    Ok(serde_json::json!({}))
}

pub async fn get_process(state: &AppState, caller: &str, msg: GetProcessMsg) -> HandlerResult {
    let process = find(state, &msg.process_id).await?;
    require_member_or_owner(state, caller, &process.spec.colony_name).await?;
    Ok(serde_json::to_value(process)?)
}

pub async fn get_processes(state: &AppState, caller: &str, msg: GetProcessesMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let state_filter = ProcessState::try_from(msg.state).map_err(ServerError::Validation)?;

    let mut processes =
        Process::find_by_state(&msg.colony_name, state_filter, msg.count, &state.pool).await?;
    for process in &mut processes {
        process.load_attributes(&state.pool).await?;
    }
    Ok(serde_json::to_value(processes)?)
}

pub async fn remove_process(
    state: &AppState,
    caller: &str,
    msg: RemoveProcessMsg,
) -> HandlerResult {
    let process = find(state, &msg.process_id).await?;
    require_member_or_owner(state, caller, &process.spec.colony_name).await?;
    if process.state == ProcessState::Running {
        return Err(ServerError::Conflict(
            "cannot remove a running process".to_string(),
        ));
    }
    Process::remove(&process.id, &state.pool).await?;
    info!(process_id = %process.id, "process removed");
    Ok(serde_json::json!({}))
}

pub async fn get_processgraph(
    state: &AppState,
    caller: &str,
    msg: GetProcessGraphMsg,
) -> HandlerResult {
    let graph = ProcessGraph::find_by_id(&msg.processgraph_id, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!(
                "process graph <{}> does not exist",
                msg.processgraph_id
            ))
        })?;
    require_member_or_owner(state, caller, &graph.colony_name).await?;
    Ok(serde_json::to_value(graph)?)
}

pub async fn get_processgraphs(
    state: &AppState,
    caller: &str,
    msg: GetProcessGraphsMsg,
) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let state_filter = if msg.state < 0 {
        None
    } else {
        Some(ProcessState::try_from(msg.state).map_err(ServerError::Validation)?)
    };
    let graphs =
        ProcessGraph::find_by_colony(&msg.colony_name, state_filter, msg.count, &state.pool)
            .await?;
    Ok(serde_json::to_value(graphs)?)
}

pub async fn add_attribute(state: &AppState, caller: &str, msg: AddAttributeMsg) -> HandlerResult {
    let process = find(state, &msg.attribute.target_id).await?;
    security::require_member(caller, &process.spec.colony_name, &state.pool).await?;

    // A running process belongs to its assigned executor.
    if process.state == ProcessState::Running && process.assigned_executor_id != caller {
        return Err(ServerError::Forbidden(
            "only the assigned executor may attach attributes to a running process".to_string(),
        ));
    }

    let attribute = Attribute::new(
        &process.id,
        &process.spec.colony_name,
        msg.attribute.attribute_type,
        &msg.attribute.key,
        &msg.attribute.value,
    );
    let attribute = attribute.insert(&state.pool).await?;
    Ok(serde_json::to_value(attribute)?)
}

pub async fn get_attribute(state: &AppState, caller: &str, msg: GetAttributeMsg) -> HandlerResult {
    let attribute = Attribute::find_by_id(&msg.attribute_id, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("attribute <{}> does not exist", msg.attribute_id))
        })?;
    require_member_or_owner(state, caller, &attribute.target_colony_name).await?;
    Ok(serde_json::to_value(attribute)?)
}

async fn find(state: &AppState, process_id: &str) -> Result<Process, ServerError> {
    Process::find_by_id(process_id, &state.pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("process <{process_id}> does not exist")))
}
