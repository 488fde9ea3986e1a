//! Long-poll subscriptions: process-state waits, colony waits, and the
//! one-outstanding-wait rule.

mod common;

use std::time::Duration;

use colonies_core::common::ServerError;
use colonies_core::domains::process::{Process, ProcessState};
use colonies_core::server::handlers;
use colonies_core::server::messages::{
    AssignProcessMsg, CloseSuccessfulMsg, SubscribeProcessMsg, SubscribeProcessesMsg,
};

fn assign_msg(colony_name: &str) -> AssignProcessMsg {
    AssignProcessMsg {
        colony_name: colony_name.to_string(),
        timeout: 0,
        available_cpu: String::new(),
        available_memory: String::new(),
    }
}

#[tokio::test]
async fn test_subscribe_process_wakes_on_close() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;
    let watcher = common::add_approved_executor(&env, &colony, "watcher", "worker").await;
    let eid = executor.executor.id.clone();

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &eid, spec).await;
    handlers::process::assign(&env.state, &eid, assign_msg(&colony.colony.name))
        .await
        .unwrap();

    let state = env.state.clone();
    let watcher_id = watcher.executor.id.clone();
    let colony_name = colony.colony.name.clone();
    let process_id = submitted.id.clone();
    let subscriber = tokio::spawn(async move {
        handlers::subscription::subscribe_process(
            &state,
            &watcher_id,
            SubscribeProcessMsg {
                colony_name,
                process_id,
                executor_type: String::new(),
                state: 2,
                timeout: 10,
            },
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    handlers::process::close_successful(
        &env.state,
        &eid,
        CloseSuccessfulMsg {
            process_id: submitted.id.clone(),
            out: vec![],
        },
    )
    .await
    .unwrap();

    let value = tokio::time::timeout(Duration::from_secs(5), subscriber)
        .await
        .expect("subscription never woke")
        .unwrap()
        .unwrap();
    let process: Process = serde_json::from_value(value).unwrap();
    assert_eq!(process.state, ProcessState::Success);
}

#[tokio::test]
async fn test_subscribe_process_timeout_reports_current_state() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;

    // Nothing will close this process; the wait times out.
    let value = handlers::subscription::subscribe_process(
        &env.state,
        &executor.executor.id,
        SubscribeProcessMsg {
            colony_name: colony.colony.name.clone(),
            process_id: submitted.id.clone(),
            executor_type: String::new(),
            state: 2,
            timeout: 1,
        },
    )
    .await
    .unwrap();
    let process: Process = serde_json::from_value(value).unwrap();
    assert_eq!(process.state, ProcessState::Waiting);
}

#[tokio::test]
async fn test_subscribe_processes_sees_new_submission() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let state = env.state.clone();
    let watcher_id = executor.executor.id.clone();
    let colony_name = colony.colony.name.clone();
    let subscriber = tokio::spawn(async move {
        handlers::subscription::subscribe_processes(
            &state,
            &watcher_id,
            SubscribeProcessesMsg {
                colony_name,
                executor_type: "worker".to_string(),
                state: 0,
                timeout: 10,
            },
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let spec = common::function_spec(&colony.colony.name, "worker", 0, -1, 0);
    let submitted = common::submit(&env, &executor.executor.id, spec).await;

    let value = tokio::time::timeout(Duration::from_secs(5), subscriber)
        .await
        .expect("subscription never woke")
        .unwrap()
        .unwrap();
    let process: Process = serde_json::from_value(value).unwrap();
    assert_eq!(process.id, submitted.id);
}

#[tokio::test]
async fn test_second_concurrent_wait_is_rejected() {
    let env = common::setup().await;
    let colony = common::add_colony(&env).await;
    let executor = common::add_approved_executor(&env, &colony, "exec1", "worker").await;

    let state = env.state.clone();
    let watcher_id = executor.executor.id.clone();
    let colony_name = colony.colony.name.clone();
    let first = tokio::spawn(async move {
        handlers::subscription::subscribe_processes(
            &state,
            &watcher_id,
            SubscribeProcessesMsg {
                colony_name,
                executor_type: "worker".to_string(),
                state: 0,
                timeout: 3,
            },
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = handlers::subscription::subscribe_processes(
        &env.state,
        &executor.executor.id,
        SubscribeProcessesMsg {
            colony_name: colony.colony.name.clone(),
            executor_type: "worker".to_string(),
            state: 0,
            timeout: 3,
        },
    )
    .await;
    assert!(matches!(second, Err(ServerError::Conflict(_))));

    // The first wait is unaffected and times out normally.
    let value = first.await.unwrap().unwrap();
    assert!(value.is_null());
}
