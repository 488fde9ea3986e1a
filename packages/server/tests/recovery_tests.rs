//! Recovery loop: exec-deadline retries, terminal failure, wait-deadline
//! liveness.

mod common;

use std::time::Duration;

use colonies_core::domains::process::{Process, ProcessState};
use colonies_core::kernel::RecoveryWorker;
use colonies_core::server::handlers;
use colonies_core::server::messages::AssignProcessMsg;

fn assign_msg(colony_name: &str) -> AssignProcessMsg {
    AssignProcessMsg {
        colony_name: colony_name.to_string(),
        timeout: 0,
        available_cpu: String::new(),
        available_memory: String::new(),
    }
}

fn spawn_recovery(env: &common::TestEnv) {
    let worker = RecoveryWorker::new(
        env.pool().clone(),
        env.state.events.clone(),
        Duration::from_millis(100),
        env.shutdown_rx(),
    );
    tokio::spawn(worker.run());
}

#[tokio::test]
async fn test_exec_timeout_resets_then_fails() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let eid = executor.executor.id.clone();
    spawn_recovery(&env);

    // One second of exec budget, one retry.
    let spec = common::function_spec(&colony.colony.name, "worker", 0, 1, 1);
    let submitted = common::submit(&env, &eid, spec).await;

    handlers::process::assign(&env.state, &eid, assign_msg(&colony.colony.name))
        .await
        .unwrap();

    // Never closed: the recovery loop resets it back to WAITING.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let process = Process::find_by_id(&submitted.id, env.pool())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Waiting);
    assert!(!process.is_assigned);
    assert_eq!(process.retries, 1);
    assert!(process.start_time.is_none());

    // Second attempt exhausts the retry budget.
    handlers::process::assign(&env.state, &eid, assign_msg(&colony.colony.name))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let process = Process::find_by_id(&submitted.id, env.pool())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Failed);
    assert!(!process.is_assigned);
    assert!(process
        .err_attributes
        .iter()
        .any(|a| a.value.contains("max exec time")));
}

#[tokio::test]
async fn test_unbounded_retries_never_fail() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let eid = executor.executor.id.clone();
    spawn_recovery(&env);

    let spec = common::function_spec(&colony.colony.name, "worker", 0, 1, -1);
    let submitted = common::submit(&env, &eid, spec).await;

    for expected_retries in 1..=2 {
        handlers::process::assign(&env.state, &eid, assign_msg(&colony.colony.name))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let process = Process::find_by_id(&submitted.id, env.pool())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(process.state, ProcessState::Waiting);
        assert_eq!(process.retries, expected_retries);
    }
}

#[tokio::test]
async fn test_waiting_process_fails_after_max_wait_time() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    spawn_recovery(&env);

    // One second of wait budget, nobody pulls.
    let spec = common::function_spec(&colony.colony.name, "worker", 1, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;

    tokio::time::sleep(Duration::from_millis(1800)).await;

    let process = Process::find_by_id(&submitted.id, env.pool())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Failed);
    assert!(process.end_time.is_some());
    assert!(process
        .err_attributes
        .iter()
        .any(|a| a.value.contains("max waittime")));
}

#[tokio::test]
async fn test_completed_process_is_untouched_by_recovery() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let eid = executor.executor.id.clone();
    spawn_recovery(&env);

    let spec = common::function_spec(&colony.colony.name, "worker", 0, 1, 3);
    let submitted = common::submit(&env, &eid, spec).await;
    handlers::process::assign(&env.state, &eid, assign_msg(&colony.colony.name))
        .await
        .unwrap();

    // Close before the deadline; recovery must not resurrect it.
    handlers::process::close_successful(
        &env.state,
        &eid,
        colonies_core::server::messages::CloseSuccessfulMsg {
            process_id: submitted.id.clone(),
            out: vec![],
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let process = Process::find_by_id(&submitted.id, env.pool())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Success);
    assert_eq!(process.retries, 0);
}
