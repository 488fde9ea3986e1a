//! Process lifecycle: submission, assignment, closing, and the state
//! invariants along the way.

mod common;

use colonies_core::common::ServerError;
use colonies_core::domains::process::{Process, ProcessState};
use colonies_core::server::handlers;
use colonies_core::server::messages::{AssignProcessMsg, CloseSuccessfulMsg};

fn assign_msg(colony_name: &str) -> AssignProcessMsg {
    AssignProcessMsg {
        colony_name: colony_name.to_string(),
        timeout: 0,
        available_cpu: String::new(),
        available_memory: String::new(),
    }
}

#[tokio::test]
async fn test_single_executor_assignment() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;
    assert_eq!(submitted.state, ProcessState::Waiting);

    let value = handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();
    let assigned: Process = serde_json::from_value(value).unwrap();

    assert_eq!(assigned.id, submitted.id);
    assert_eq!(assigned.state, ProcessState::Running);
    assert!(assigned.is_assigned);
    assert_eq!(assigned.assigned_executor_id, executor.executor.id);
    assert!(assigned.start_time.is_some());

    // Nothing left to pull.
    let second = handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await;
    assert!(matches!(second, Err(ServerError::NotFound(_))));
}

#[tokio::test]
async fn test_close_successful_stamps_times_and_output() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;

    handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();

    handlers::process::close_successful(
        &env.state,
        &executor.executor.id,
        CloseSuccessfulMsg {
            process_id: submitted.id.clone(),
            out: vec![serde_json::json!("result-42")],
        },
    )
    .await
    .unwrap();

    let process = Process::find_by_id(&submitted.id, env.pool())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Success);
    assert!(!process.is_assigned);
    assert!(process.assigned_executor_id.is_empty());

    // endTime >= startTime >= submissionTime
    let start = process.start_time.unwrap();
    let end = process.end_time.unwrap();
    assert!(end >= start);
    assert!(start >= process.submission_time);

    assert_eq!(process.out_attributes.len(), 1);
    assert_eq!(process.out_attributes[0].key, "output");
}

#[tokio::test]
async fn test_close_requires_assigned_executor() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let exec1 = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let exec2 = common::add_approved_executor(&env, &colony, "exec2", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &exec1.executor.id, spec).await;
    handlers::process::assign(
        &env.state,
        &exec1.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();

    let result = handlers::process::close_successful(
        &env.state,
        &exec2.executor.id,
        CloseSuccessfulMsg {
            process_id: submitted.id.clone(),
            out: vec![],
        },
    )
    .await;
    assert!(matches!(result, Err(ServerError::Forbidden(_))));
}

#[tokio::test]
async fn test_close_on_waiting_process_is_conflict() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;

    let result = Process::close(&submitted.id, ProcessState::Success, env.pool()).await;
    assert!(matches!(result, Err(ServerError::Conflict(_))));

    let result = Process::close(&submitted.id, ProcessState::Failed, env.pool()).await;
    assert!(matches!(result, Err(ServerError::Conflict(_))));
}

#[tokio::test]
async fn test_executor_type_must_match() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "gpu-node", 0, -1, 0);
    common::submit(&env, &executor.executor.id, spec).await;

    let result = handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await;
    assert!(matches!(result, Err(ServerError::NotFound(_))));
}

#[tokio::test]
async fn test_explicit_executor_list_is_honored() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let exec1 = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let exec2 = common::add_approved_executor(&env, &colony, "exec2", "worker").await;

    let mut spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    spec.executor_ids = vec![exec1.executor.id.clone()];
    common::submit(&env, &exec1.executor.id, spec).await;

    // exec2 is not in the target list.
    let result = handlers::process::assign(
        &env.state,
        &exec2.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await;
    assert!(matches!(result, Err(ServerError::NotFound(_))));

    let value = handlers::process::assign(
        &env.state,
        &exec1.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();
    let assigned: Process = serde_json::from_value(value).unwrap();
    assert_eq!(assigned.assigned_executor_id, exec1.executor.id);
}

#[tokio::test]
async fn test_priority_order_wins_over_submission_order() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let low = common::submit(
        &env,
        &executor.executor.id,
        common::function_spec(&colony.colony.name, "worker", 0, -1, 0),
    )
    .await;
    let mut spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    spec.priority = 10;
    let high = common::submit(&env, &executor.executor.id, spec).await;

    let value = handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();
    let first: Process = serde_json::from_value(value).unwrap();
    assert_eq!(first.id, high.id);

    let value = handlers::process::assign(
        &env.state,
        &executor.executor.id,
        assign_msg(&colony.colony.name),
    )
    .await
    .unwrap();
    let second: Process = serde_json::from_value(value).unwrap();
    assert_eq!(second.id, low.id);
}
