//! Long-poll subscription handlers.
//!
//! An executor blocks on "process P reaches state S" or "a process of my
//! type shows up in colony C", bounded by the message timeout. One
//! outstanding wait per executor; duplicate wakes make the handler re-read
//! the database, which is safe.

use std::time::Duration;

use crate::common::ServerError;
use crate::domains::process::{Process, ProcessState};
use crate::kernel::security;
use crate::kernel::WaitOutcome;
use crate::server::app::AppState;
use crate::server::handlers::HandlerResult;
use crate::server::messages::{SubscribeProcessMsg, SubscribeProcessesMsg};

pub async fn subscribe_process(
    state: &AppState,
    caller: &str,
    msg: SubscribeProcessMsg,
) -> HandlerResult {
    let executor =
        security::require_approved_executor(caller, &msg.colony_name, &state.pool).await?;
    let target_state = ProcessState::try_from(msg.state).map_err(ServerError::Validation)?;

    // Subscribe before the first read so a commit in between still wakes us.
    let mut waiter = state.events.subscribe_process(&msg.process_id).await;

    let process = find(state, &msg.process_id).await?;
    if process.spec.colony_name != msg.colony_name {
        return Err(ServerError::Forbidden(
            "process belongs to another colony".to_string(),
        ));
    }
    if process.state == target_state || msg.timeout <= 0 {
        return Ok(serde_json::to_value(process)?);
    }

    let _guard = state.events.begin_wait(&executor.id)?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(msg.timeout as u64);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match waiter.wait(Some(target_state), remaining).await {
            WaitOutcome::Event(_) | WaitOutcome::Wake => {
                let process = find(state, &msg.process_id).await?;
                if process.state == target_state {
                    return Ok(serde_json::to_value(process)?);
                }
            }
            WaitOutcome::Timeout | WaitOutcome::Shutdown => break,
        }
    }

    // Not yet: report the current state.
    let process = find(state, &msg.process_id).await?;
    Ok(serde_json::to_value(process)?)
}

pub async fn subscribe_processes(
    state: &AppState,
    caller: &str,
    msg: SubscribeProcessesMsg,
) -> HandlerResult {
    let executor =
        security::require_approved_executor(caller, &msg.colony_name, &state.pool).await?;
    let target_state = ProcessState::try_from(msg.state).map_err(ServerError::Validation)?;

    if msg.timeout <= 0 {
        return Ok(serde_json::Value::Null);
    }

    let mut waiter = state
        .events
        .subscribe_colony(&msg.colony_name, &msg.executor_type)
        .await;
    let _guard = state.events.begin_wait(&executor.id)?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(msg.timeout as u64);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(serde_json::Value::Null);
        }
        match waiter.wait(Some(target_state), remaining).await {
            WaitOutcome::Event(event) => {
                if let Some(process) = Process::find_by_id(&event.process_id, &state.pool).await? {
                    return Ok(serde_json::to_value(process)?);
                }
            }
            WaitOutcome::Wake => continue,
            WaitOutcome::Timeout | WaitOutcome::Shutdown => {
                return Ok(serde_json::Value::Null);
            }
        }
    }
}

async fn find(state: &AppState, process_id: &str) -> Result<Process, ServerError> {
    Process::find_by_id(process_id, &state.pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("process <{process_id}> does not exist")))
}
