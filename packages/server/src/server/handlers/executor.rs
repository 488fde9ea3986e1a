use tracing::info;

use crate::common::ServerError;
use crate::domains::executor::{Executor, ExecutorState};
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::{require_member_or_owner, HandlerResult};
use crate::server::messages::{
    AddExecutorMsg, ApproveExecutorMsg, GetExecutorMsg, GetExecutorsMsg, RejectExecutorMsg,
    RemoveExecutorMsg,
};

pub async fn add_executor(state: &AppState, caller: &str, msg: AddExecutorMsg) -> HandlerResult {
    security::require_colony_owner(caller, &msg.executor.colony_name, &state.pool).await?;

    if msg.executor.id.len() != 64 {
        return Err(ServerError::Validation(
            "executor id must be a 64-char hex identity".to_string(),
        ));
    }
    if msg.executor.name.is_empty() {
        return Err(ServerError::Validation(
            "executor name must not be empty".to_string(),
        ));
    }

    // Registration never grants approval.
    let mut executor = msg.executor;
    executor.state = ExecutorState::Pending;
    let executor = executor.insert(&state.pool).await?;
    info!(
        executor_name = %executor.name,
        colony_name = %executor.colony_name,
        "executor added"
    );
    Ok(serde_json::to_value(executor)?)
}

pub async fn get_executor(state: &AppState, caller: &str, msg: GetExecutorMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let executor = Executor::find_by_name(&msg.colony_name, &msg.executor_name, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("executor <{}> does not exist", msg.executor_name))
        })?;
    Ok(serde_json::to_value(executor)?)
}

pub async fn get_executors(state: &AppState, caller: &str, msg: GetExecutorsMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let executors = Executor::find_by_colony(&msg.colony_name, &state.pool).await?;
    Ok(serde_json::to_value(executors)?)
}

pub async fn approve_executor(
    state: &AppState,
    caller: &str,
    msg: ApproveExecutorMsg,
) -> HandlerResult {
    security::require_colony_owner(caller, &msg.colony_name, &state.pool).await?;
    let executor = find(state, &msg.colony_name, &msg.executor_name).await?;
    Executor::approve(&executor.id, &state.pool).await?;
    info!(executor_name = %executor.name, "executor approved");
    Ok(serde_json::json!({}))
}

pub async fn reject_executor(
    state: &AppState,
    caller: &str,
    msg: RejectExecutorMsg,
) -> HandlerResult {
    security::require_colony_owner(caller, &msg.colony_name, &state.pool).await?;
    let executor = find(state, &msg.colony_name, &msg.executor_name).await?;
    Executor::reject(&executor.id, &state.pool).await?;
    info!(executor_name = %executor.name, "executor rejected");
    Ok(serde_json::json!({}))
}

pub async fn remove_executor(
    state: &AppState,
    caller: &str,
    msg: RemoveExecutorMsg,
) -> HandlerResult {
    security::require_colony_owner(caller, &msg.colony_name, &state.pool).await?;
    Executor::remove(&msg.colony_name, &msg.executor_name, &state.pool).await?;
    info!(executor_name = %msg.executor_name, "executor removed");
    Ok(serde_json::json!({}))
}

async fn find(state: &AppState, colony_name: &str, name: &str) -> Result<Executor, ServerError> {
    Executor::find_by_name(colony_name, name, &state.pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("executor <{name}> does not exist")))
}
