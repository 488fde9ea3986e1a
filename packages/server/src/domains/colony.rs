//! Colony model - SQL persistence layer.
//!
//! A colony is the tenant boundary: a named group of executors, users,
//! processes, generators and files. Removing a colony cascades to
//! everything it owns.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::ServerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Colony {
    #[serde(rename = "colonyid")]
    #[sqlx(rename = "colony_id")]
    pub id: String,
    pub name: String,
}

/// Per-state process counts for a colony.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColonyStatistics {
    pub executors: i64,
    #[serde(rename = "waitingprocesses")]
    pub waiting_processes: i64,
    #[serde(rename = "runningprocesses")]
    pub running_processes: i64,
    #[serde(rename = "successfulprocesses")]
    pub successful_processes: i64,
    #[serde(rename = "failedprocesses")]
    pub failed_processes: i64,
    #[serde(rename = "waitingworkflows")]
    pub waiting_workflows: i64,
    #[serde(rename = "runningworkflows")]
    pub running_workflows: i64,
    #[serde(rename = "successfulworkflows")]
    pub successful_workflows: i64,
    #[serde(rename = "failedworkflows")]
    pub failed_workflows: i64,
}

impl Colony {
    pub fn new(id: String, name: String) -> Self {
        Self { id, name }
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, ServerError> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO colonies (colony_id, name) VALUES ($1, $2) RETURNING *",
        )
        .bind(&self.id)
        .bind(&self.name)
        .fetch_one(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ServerError::Conflict(format!("colony <{}> already exists", self.name))
            }
            other => other.into(),
        })
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM colonies WHERE colony_id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_name(name: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM colonies WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM colonies ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Remove the colony and everything it owns.
    pub async fn remove(name: &str, pool: &PgPool) -> Result<(), ServerError> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM attributes WHERE target_id IN
                 (SELECT process_id FROM processes WHERE target_colony_name = $1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM processes WHERE target_colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM processgraphs WHERE target_colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM generators WHERE colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM executors WHERE colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshots WHERE colony_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM colonies WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "colony <{name}> does not exist"
            )));
        }
        Ok(())
    }

    pub async fn statistics(name: &str, pool: &PgPool) -> Result<ColonyStatistics, ServerError> {
        let executors =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM executors WHERE colony_name = $1")
                .bind(name)
                .fetch_one(pool)
                .await?;

        let mut stats = ColonyStatistics {
            executors,
            ..Default::default()
        };

        let process_counts = sqlx::query_as::<_, (i32, i64)>(
            "SELECT state, COUNT(*) FROM processes WHERE target_colony_name = $1 GROUP BY state",
        )
        .bind(name)
        .fetch_all(pool)
        .await?;
        for (state, count) in process_counts {
            match state {
                0 => stats.waiting_processes = count,
                1 => stats.running_processes = count,
                2 => stats.successful_processes = count,
                3 => stats.failed_processes = count,
                _ => {}
            }
        }

        let graph_counts = sqlx::query_as::<_, (i32, i64)>(
            "SELECT state, COUNT(*) FROM processgraphs WHERE target_colony_name = $1 GROUP BY state",
        )
        .bind(name)
        .fetch_all(pool)
        .await?;
        for (state, count) in graph_counts {
            match state {
                0 => stats.waiting_workflows = count,
                1 => stats.running_workflows = count,
                2 => stats.successful_workflows = count,
                3 => stats.failed_workflows = count,
                _ => {}
            }
        }

        Ok(stats)
    }
}
