//! Process graph (workflow instance) model.
//!
//! A graph's state is derived from its member processes: any failure makes
//! the graph failed, full success makes it successful, any running member
//! keeps it running, otherwise it is still waiting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::ServerError;
use crate::domains::process::ProcessState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessGraph {
    #[serde(rename = "processgraphid")]
    #[sqlx(rename = "processgraph_id")]
    pub id: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "target_colony_name")]
    pub colony_name: String,
    pub state: ProcessState,
    #[serde(rename = "rootprocessids")]
    #[sqlx(rename = "root_process_ids")]
    pub root_process_ids: Vec<String>,
    #[serde(rename = "processids")]
    #[sqlx(rename = "process_ids")]
    pub process_ids: Vec<String>,
    #[serde(rename = "submissiontime")]
    #[sqlx(rename = "submission_time")]
    pub submission_time: DateTime<Utc>,
    #[serde(rename = "starttime")]
    #[sqlx(rename = "start_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endtime")]
    #[sqlx(rename = "end_time")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Fold member process states into the graph state.
pub fn derive_graph_state(states: &[ProcessState]) -> ProcessState {
    if states.iter().any(|s| *s == ProcessState::Failed) {
        return ProcessState::Failed;
    }
    if states.iter().all(|s| *s == ProcessState::Success) {
        return ProcessState::Success;
    }
    if states.iter().any(|s| *s == ProcessState::Running) {
        return ProcessState::Running;
    }
    ProcessState::Waiting
}

impl ProcessGraph {
    pub async fn insert_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO processgraphs (
                processgraph_id, target_colony_name, state,
                root_process_ids, process_ids, submission_time,
                start_time, end_time
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&self.id)
        .bind(&self.colony_name)
        .bind(self.state)
        .bind(&self.root_process_ids)
        .bind(&self.process_ids)
        .bind(self.submission_time)
        .bind(self.start_time)
        .bind(self.end_time)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM processgraphs WHERE processgraph_id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_colony(
        colony_name: &str,
        state: Option<ProcessState>,
        count: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        match state {
            Some(state) => sqlx::query_as::<_, Self>(
                "SELECT * FROM processgraphs
                 WHERE target_colony_name = $1 AND state = $2
                 ORDER BY submission_time DESC LIMIT $3",
            )
            .bind(colony_name)
            .bind(state)
            .bind(count)
            .fetch_all(pool)
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, Self>(
                "SELECT * FROM processgraphs
                 WHERE target_colony_name = $1
                 ORDER BY submission_time DESC LIMIT $2",
            )
            .bind(colony_name)
            .bind(count)
            .fetch_all(pool)
            .await
            .map_err(Into::into),
        }
    }

    /// Persist a newly derived state, stamping start/end times as the graph
    /// enters running and terminal states.
    pub async fn update_state(
        id: &str,
        state: ProcessState,
        pool: &PgPool,
    ) -> Result<(), ServerError> {
        let set_start = state != ProcessState::Waiting;
        let set_end = state.is_terminal();
        sqlx::query(
            "UPDATE processgraphs
             SET state = $2,
                 start_time = CASE WHEN $3 THEN COALESCE(start_time, NOW()) ELSE start_time END,
                 end_time = CASE WHEN $4 THEN COALESCE(end_time, NOW()) ELSE NULL END
             WHERE processgraph_id = $1",
        )
        .bind(id)
        .bind(state)
        .bind(set_start)
        .bind(set_end)
        .execute(pool)
        .await?;
        Ok(())
    }
}
