//! Test harness with testcontainers for integration testing.
//!
//! The Postgres container and migrations are initialized once on first use
//! and shared across all tests; each test works in its own randomly named
//! colony so tests never observe each other's data.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use colonies_core::common::crypto;
use colonies_core::domains::colony::Colony;
use colonies_core::domains::executor::Executor;
use colonies_core::domains::process::{FunctionSpec, Process};
use colonies_core::domains::user::User;
use colonies_core::kernel::{AssignmentEngine, EventHub};
use colonies_core::server::handlers;
use colonies_core::server::messages::{
    AddColonyMsg, AddExecutorMsg, AddUserMsg, ApproveExecutorMsg, SubmitFunctionSpecMsg,
};
use colonies_core::server::AppState;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::{watch, OnceCell};

struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub server_prvkey: String,
    pub shutdown: watch::Sender<bool>,
}

impl TestEnv {
    pub fn pool(&self) -> &PgPool {
        &self.state.pool
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

pub async fn setup() -> TestEnv {
    let infra = SharedTestInfra::get().await;
    let pool = PgPool::connect(&infra.db_url)
        .await
        .expect("Failed to connect to shared test database");

    let (server_prvkey, server_id) = crypto::generate_keypair();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let events = EventHub::new(shutdown_rx);
    let assignment = Arc::new(AssignmentEngine::new(pool.clone(), events.clone()));

    TestEnv {
        state: AppState {
            pool,
            server_id,
            events,
            assignment,
            s3: None,
        },
        server_prvkey,
        shutdown,
    }
}

pub struct ColonyFixture {
    pub colony: Colony,
    pub prvkey: String,
}

/// Register a fresh colony with a unique name.
pub async fn add_colony(env: &TestEnv) -> ColonyFixture {
    let (prvkey, id) = crypto::generate_keypair();
    let name = format!("testcolony-{}", &crypto::random_id()[..12]);
    let colony = Colony::new(id, name);

    handlers::colony::add_colony(
        &env.state,
        &env.state.server_id,
        AddColonyMsg {
            colony: colony.clone(),
        },
    )
    .await
    .expect("add_colony failed");

    ColonyFixture { colony, prvkey }
}

pub struct ExecutorFixture {
    pub executor: Executor,
    pub prvkey: String,
}

/// Register and approve an executor in the colony.
pub async fn add_approved_executor(
    env: &TestEnv,
    colony: &ColonyFixture,
    name: &str,
    executor_type: &str,
) -> ExecutorFixture {
    let fixture = add_pending_executor(env, colony, name, executor_type).await;

    handlers::executor::approve_executor(
        &env.state,
        &colony.colony.id,
        ApproveExecutorMsg {
            colony_name: colony.colony.name.clone(),
            executor_name: name.to_string(),
        },
    )
    .await
    .expect("approve_executor failed");

    let executor = Executor::find_by_name(&colony.colony.name, name, env.pool())
        .await
        .unwrap()
        .expect("executor should exist after approval");
    ExecutorFixture {
        executor,
        prvkey: fixture.prvkey,
    }
}

pub async fn add_pending_executor(
    env: &TestEnv,
    colony: &ColonyFixture,
    name: &str,
    executor_type: &str,
) -> ExecutorFixture {
    let (prvkey, id) = crypto::generate_keypair();
    let executor = Executor::new(
        id,
        executor_type.to_string(),
        name.to_string(),
        colony.colony.name.clone(),
    );

    handlers::executor::add_executor(
        &env.state,
        &colony.colony.id,
        AddExecutorMsg {
            executor: executor.clone(),
        },
    )
    .await
    .expect("add_executor failed");

    ExecutorFixture { executor, prvkey }
}

pub struct UserFixture {
    pub user: User,
    pub prvkey: String,
}

pub async fn add_user(env: &TestEnv, colony: &ColonyFixture, name: &str) -> UserFixture {
    let (prvkey, id) = crypto::generate_keypair();
    let user = User::new(id, name.to_string(), colony.colony.name.clone());

    handlers::user::add_user(
        &env.state,
        &colony.colony.id,
        AddUserMsg { user: user.clone() },
    )
    .await
    .expect("add_user failed");

    UserFixture { user, prvkey }
}

/// Build a function spec targeting any executor of the given type.
pub fn function_spec(
    colony_name: &str,
    executor_type: &str,
    max_wait_time: i64,
    max_exec_time: i64,
    max_retries: i32,
) -> FunctionSpec {
    serde_json::from_value(serde_json::json!({
        "funcname": "echo",
        "colonyname": colony_name,
        "executorids": ["*"],
        "executortype": executor_type,
        "maxwaittime": max_wait_time,
        "maxexectime": max_exec_time,
        "maxretries": max_retries,
    }))
    .expect("invalid test function spec")
}

/// Submit a spec as the given member and return the stored process.
pub async fn submit(env: &TestEnv, caller_id: &str, spec: FunctionSpec) -> Process {
    let value = handlers::process::submit(
        &env.state,
        caller_id,
        SubmitFunctionSpecMsg { spec },
    )
    .await
    .expect("submit failed");
    serde_json::from_value(value).expect("submit returned malformed process")
}
