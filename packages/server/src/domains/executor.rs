//! Executor model - SQL persistence layer.
//!
//! An executor is a worker agent bound to exactly one colony. It starts out
//! Pending and may only pull work once the colony owner has approved it.
//! `last_heard_from_time` is touched on every authenticated call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::ServerError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
#[serde(into = "i32", try_from = "i32")]
pub enum ExecutorState {
    Pending = 0,
    Approved = 1,
    Rejected = 2,
}

impl Default for ExecutorState {
    fn default() -> Self {
        ExecutorState::Pending
    }
}

impl From<ExecutorState> for i32 {
    fn from(state: ExecutorState) -> i32 {
        state as i32
    }
}

impl TryFrom<i32> for ExecutorState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExecutorState::Pending),
            1 => Ok(ExecutorState::Approved),
            2 => Ok(ExecutorState::Rejected),
            other => Err(format!("unknown executor state {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "long")]
    pub longitude: f64,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "desc")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub name: String,
    #[serde(rename = "mem")]
    pub memory: String,
    pub count: i32,
    #[serde(rename = "nodecount")]
    pub node_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    pub model: String,
    pub nodes: i32,
    pub cpu: String,
    #[serde(rename = "mem")]
    pub memory: String,
    pub storage: String,
    pub gpu: Gpu,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Software {
    pub name: String,
    #[serde(rename = "type")]
    pub software_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub hardware: Hardware,
    pub software: Software,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "allocatedcpu")]
    pub allocated_cpu: i64,
    #[serde(rename = "usedcpu")]
    pub used_cpu: i64,
    #[serde(rename = "allocatedgpu")]
    pub allocated_gpu: i64,
    #[serde(rename = "usedgpu")]
    pub used_gpu: i64,
    #[serde(rename = "allocatedstorage")]
    pub allocated_storage: i64,
    #[serde(rename = "usedstorage")]
    pub used_storage: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocations {
    #[serde(default)]
    pub projects: std::collections::HashMap<String, Project>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Executor {
    #[serde(rename = "executorid")]
    #[sqlx(rename = "executor_id")]
    pub id: String,
    #[serde(rename = "executortype")]
    #[sqlx(rename = "executor_type")]
    pub executor_type: String,
    #[serde(rename = "executorname")]
    pub name: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "colony_name")]
    pub colony_name: String,
    #[serde(default)]
    pub state: ExecutorState,
    #[serde(rename = "requirefuncreg", default)]
    #[sqlx(rename = "require_func_reg")]
    pub require_func_reg: bool,
    #[serde(rename = "commissiontime", default = "Utc::now")]
    #[sqlx(rename = "commission_time")]
    pub commission_time: DateTime<Utc>,
    #[serde(rename = "lastheardfromtime", default = "Utc::now")]
    #[sqlx(rename = "last_heard_from_time")]
    pub last_heard_from_time: DateTime<Utc>,
    #[serde(default)]
    #[sqlx(json)]
    pub location: Location,
    #[serde(default)]
    #[sqlx(json)]
    pub capabilities: Capabilities,
    #[serde(default)]
    #[sqlx(json)]
    pub allocations: Allocations,
}

impl Executor {
    pub fn new(id: String, executor_type: String, name: String, colony_name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            executor_type,
            name,
            colony_name,
            state: ExecutorState::Pending,
            require_func_reg: false,
            commission_time: now,
            last_heard_from_time: now,
            location: Location::default(),
            capabilities: Capabilities::default(),
            allocations: Allocations::default(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.state == ExecutorState::Approved
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, ServerError> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO executors (
                executor_id, executor_type, name, colony_name, state,
                require_func_reg, commission_time, last_heard_from_time,
                location, capabilities, allocations
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(&self.id)
        .bind(&self.executor_type)
        .bind(&self.name)
        .bind(&self.colony_name)
        .bind(self.state)
        .bind(self.require_func_reg)
        .bind(self.commission_time)
        .bind(self.last_heard_from_time)
        .bind(serde_json::to_value(&self.location)?)
        .bind(serde_json::to_value(&self.capabilities)?)
        .bind(serde_json::to_value(&self.allocations)?)
        .fetch_one(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => ServerError::Conflict(
                format!("executor <{}> already exists in colony", self.name),
            ),
            other => other.into(),
        })
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM executors WHERE executor_id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_name(
        colony_name: &str,
        name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM executors WHERE colony_name = $1 AND name = $2")
            .bind(colony_name)
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_colony(
        colony_name: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM executors WHERE colony_name = $1 ORDER BY name")
            .bind(colony_name)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Approve the executor. Idempotent.
    pub async fn approve(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        Self::set_state(id, ExecutorState::Approved, pool).await
    }

    /// Reject the executor. Idempotent.
    pub async fn reject(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        Self::set_state(id, ExecutorState::Rejected, pool).await
    }

    async fn set_state(id: &str, state: ExecutorState, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("UPDATE executors SET state = $2 WHERE executor_id = $1")
            .bind(id)
            .bind(state)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "executor <{id}> does not exist"
            )));
        }
        Ok(())
    }

    /// Stamp `last_heard_from_time`, called on every authenticated request.
    pub async fn touch(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        sqlx::query("UPDATE executors SET last_heard_from_time = NOW() WHERE executor_id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn remove(colony_name: &str, name: &str, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("DELETE FROM executors WHERE colony_name = $1 AND name = $2")
            .bind(colony_name)
            .bind(name)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "executor <{name}> does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_state_wire_format() {
        // States serialize as bare integers on the wire.
        let json = serde_json::to_string(&ExecutorState::Approved).unwrap();
        assert_eq!(json, "1");
        let state: ExecutorState = serde_json::from_str("2").unwrap();
        assert_eq!(state, ExecutorState::Rejected);
        assert!(serde_json::from_str::<ExecutorState>("7").is_err());
    }

    #[test]
    fn test_executor_json_roundtrip() {
        let mut executor = Executor::new(
            "e".repeat(64),
            "container-executor".to_string(),
            "exec1".to_string(),
            "dev".to_string(),
        );
        executor.capabilities.hardware.cpu = "2000m".to_string();
        executor.capabilities.hardware.gpu.count = 2;

        let json = serde_json::to_string(&executor).unwrap();
        assert!(json.contains("\"executorid\""));
        assert!(json.contains("\"lastheardfromtime\""));

        let back: Executor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, executor);
    }

    #[test]
    fn test_new_executor_is_pending() {
        let executor = Executor::new(
            "e".repeat(64),
            "worker".to_string(),
            "exec1".to_string(),
            "dev".to_string(),
        );
        assert_eq!(executor.state, ExecutorState::Pending);
        assert!(!executor.is_approved());
    }
}
