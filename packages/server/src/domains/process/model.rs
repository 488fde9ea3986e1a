//! Process model and its state machine.
//!
//! A process is one unit of work: a function spec plus runtime state.
//! Legal transitions:
//!
//! ```text
//! WAITING ──assign──► RUNNING ──close──► SUCCESS | FAILED
//!    ▲                   │
//!    └──────reset────────┘        (retry on exec timeout)
//! ```
//!
//! Every transition is a guarded single-statement UPDATE: the WHERE clause
//! re-checks the expected state so a lost race affects zero rows instead of
//! corrupting the row. Callers inspect `rows_affected`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{crypto, ServerError};
use crate::domains::process::attribute::{Attribute, AttributeType};
use crate::domains::process::spec::FunctionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(into = "i32", try_from = "i32")]
pub enum ProcessState {
    Waiting = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
}

impl From<ProcessState> for i32 {
    fn from(state: ProcessState) -> i32 {
        state as i32
    }
}

impl TryFrom<i32> for ProcessState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProcessState::Waiting),
            1 => Ok(ProcessState::Running),
            2 => Ok(ProcessState::Success),
            3 => Ok(ProcessState::Failed),
            other => Err(format!("unknown process state {other}")),
        }
    }
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Success | ProcessState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Process {
    #[serde(rename = "processid")]
    #[sqlx(rename = "process_id")]
    pub id: String,
    #[serde(rename = "assignedexecutorid")]
    #[sqlx(rename = "assigned_executor_id")]
    pub assigned_executor_id: String,
    #[serde(rename = "isassigned")]
    #[sqlx(rename = "is_assigned")]
    pub is_assigned: bool,
    pub state: ProcessState,
    pub priority: i64,
    #[serde(rename = "submissiontime")]
    #[sqlx(rename = "submission_time")]
    pub submission_time: DateTime<Utc>,
    #[serde(rename = "starttime")]
    #[sqlx(rename = "start_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endtime")]
    #[sqlx(rename = "end_time")]
    pub end_time: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(rename = "waitforparents")]
    #[sqlx(rename = "wait_for_parents")]
    pub wait_for_parents: bool,
    pub retries: i32,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    #[serde(rename = "processgraphid")]
    #[sqlx(rename = "processgraph_id")]
    pub processgraph_id: String,
    #[serde(rename = "initiatorid")]
    #[sqlx(rename = "initiator_id")]
    pub initiator_id: String,
    #[serde(rename = "initiatorname")]
    #[sqlx(rename = "initiator_name")]
    pub initiator_name: String,
    #[serde(rename = "in", default)]
    #[sqlx(skip)]
    pub in_attributes: Vec<Attribute>,
    #[serde(rename = "out", default)]
    #[sqlx(skip)]
    pub out_attributes: Vec<Attribute>,
    #[serde(rename = "errors", default)]
    #[sqlx(skip)]
    pub err_attributes: Vec<Attribute>,
    #[sqlx(json)]
    pub spec: FunctionSpec,
}

impl Process {
    /// Build a freshly submitted process in WAITING state.
    pub fn from_spec(spec: FunctionSpec, initiator_id: &str, initiator_name: &str) -> Self {
        let now = Utc::now();
        let deadline = if spec.max_wait_time > 0 {
            Some(now + Duration::seconds(spec.max_wait_time))
        } else {
            None
        };
        Self {
            id: crypto::random_id(),
            assigned_executor_id: String::new(),
            is_assigned: false,
            state: ProcessState::Waiting,
            priority: spec.priority,
            submission_time: now,
            start_time: None,
            end_time: None,
            deadline,
            wait_for_parents: false,
            retries: 0,
            parents: Vec::new(),
            children: Vec::new(),
            processgraph_id: String::new(),
            initiator_id: initiator_id.to_string(),
            initiator_name: initiator_name.to_string(),
            in_attributes: Vec::new(),
            out_attributes: Vec::new(),
            err_attributes: Vec::new(),
            spec,
        }
    }

    pub fn colony_name(&self) -> &str {
        &self.spec.colony_name
    }

    /// Insert the process together with any pre-set attributes.
    pub async fn insert(&self, pool: &PgPool) -> Result<(), ServerError> {
        let mut tx = pool.begin().await?;
        self.insert_tx(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO processes (
                process_id, target_colony_name, target_executor_ids,
                assigned_executor_id, state, is_assigned, executor_type,
                submission_time, start_time, end_time, deadline,
                wait_for_parents, retries, max_retries, priority,
                initiator_id, initiator_name, processgraph_id,
                parents, children, spec
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                     $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
        )
        .bind(&self.id)
        .bind(&self.spec.colony_name)
        .bind(self.spec.target_executor_ids())
        .bind(&self.assigned_executor_id)
        .bind(self.state)
        .bind(self.is_assigned)
        .bind(&self.spec.executor_type)
        .bind(self.submission_time)
        .bind(self.start_time)
        .bind(self.end_time)
        .bind(self.deadline)
        .bind(self.wait_for_parents)
        .bind(self.retries)
        .bind(self.spec.max_retries)
        .bind(self.priority)
        .bind(&self.initiator_id)
        .bind(&self.initiator_name)
        .bind(&self.processgraph_id)
        .bind(&self.parents)
        .bind(&self.children)
        .bind(sqlx::types::Json(&self.spec))
        .execute(&mut **tx)
        .await?;

        for attr in self
            .in_attributes
            .iter()
            .chain(&self.out_attributes)
            .chain(&self.err_attributes)
        {
            attr.insert_tx(tx).await?;
        }
        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        let process =
            sqlx::query_as::<_, Self>("SELECT * FROM processes WHERE process_id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        match process {
            Some(mut p) => {
                p.load_attributes(pool).await?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    pub async fn load_attributes(&mut self, pool: &PgPool) -> Result<(), ServerError> {
        self.in_attributes = Attribute::find_by_target(&self.id, AttributeType::In, pool).await?;
        self.out_attributes = Attribute::find_by_target(&self.id, AttributeType::Out, pool).await?;
        self.err_attributes = Attribute::find_by_target(&self.id, AttributeType::Err, pool).await?;
        Ok(())
    }

    /// List processes of a colony in one state, with the ordering each
    /// state is conventionally browsed in.
    pub async fn find_by_state(
        colony_name: &str,
        state: ProcessState,
        count: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        let order = match state {
            ProcessState::Waiting => "priority DESC, submission_time ASC",
            ProcessState::Running => "start_time ASC",
            ProcessState::Success | ProcessState::Failed => "end_time DESC",
        };
        let sql = format!(
            "SELECT * FROM processes
             WHERE target_colony_name = $1 AND state = $2
             ORDER BY {order} LIMIT $3"
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(colony_name)
            .bind(state)
            .bind(count)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Candidate batch for the assignment engine.
    ///
    /// The `@>` containment test matches processes targeting this executor
    /// explicitly or via the `"*"` wildcard; held processes (parents not
    /// yet successful) are excluded.
    pub async fn find_unassigned_candidates(
        colony_name: &str,
        executor_id: &str,
        executor_type: &str,
        count: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM processes
             WHERE target_colony_name = $1
               AND state = 0
               AND is_assigned = FALSE
               AND wait_for_parents = FALSE
               AND (target_executor_ids @> $2 OR target_executor_ids @> $3)
               AND (executor_type = $4 OR executor_type = '')
             ORDER BY priority DESC, submission_time ASC, process_id ASC
             LIMIT $5",
        )
        .bind(colony_name)
        .bind(vec![executor_id.to_string()])
        .bind(vec!["*".to_string()])
        .bind(executor_type)
        .bind(count)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_running_past_deadline(pool: &PgPool) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM processes
             WHERE state = 1 AND deadline IS NOT NULL AND deadline < NOW()",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_waiting_past_deadline(pool: &PgPool) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM processes
             WHERE state = 0 AND deadline IS NOT NULL AND deadline < NOW()",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_graph(graph_id: &str, pool: &PgPool) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM processes WHERE processgraph_id = $1")
            .bind(graph_id)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// WAITING → RUNNING, binding the process to an executor.
    ///
    /// Returns false if the claim lost a race (the row is no longer an
    /// unassigned waiting process).
    pub async fn try_assign(
        id: &str,
        executor_id: &str,
        max_exec_time: i64,
        pool: &PgPool,
    ) -> Result<bool, ServerError> {
        let now = Utc::now();
        let deadline = if max_exec_time > 0 {
            Some(now + Duration::seconds(max_exec_time))
        } else {
            None
        };
        let result = sqlx::query(
            "UPDATE processes
             SET is_assigned = TRUE, state = 1, assigned_executor_id = $2,
                 start_time = $3, deadline = $4
             WHERE process_id = $1 AND state = 0 AND is_assigned = FALSE",
        )
        .bind(id)
        .bind(executor_id)
        .bind(now)
        .bind(deadline)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// RUNNING → SUCCESS or FAILED.
    ///
    /// Fails with `Conflict` when the process is not running: closing a
    /// waiting or already-closed process is an illegal transition.
    pub async fn close(
        id: &str,
        state: ProcessState,
        pool: &PgPool,
    ) -> Result<(), ServerError> {
        debug_assert!(state.is_terminal());
        let result = sqlx::query(
            "UPDATE processes
             SET state = $2, end_time = NOW(), is_assigned = FALSE,
                 assigned_executor_id = ''
             WHERE process_id = $1 AND state = 1",
        )
        .bind(id)
        .bind(state)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::Conflict(format!(
                "process <{id}> is not running, cannot close it"
            )));
        }
        Ok(())
    }

    /// RUNNING → WAITING, used by the retry path. Clears the assignment
    /// and all runtime timestamps, and counts the retry.
    pub async fn reset(id: &str, pool: &PgPool) -> Result<bool, ServerError> {
        let result = sqlx::query(
            "UPDATE processes
             SET state = 0, is_assigned = FALSE, assigned_executor_id = '',
                 start_time = NULL, end_time = NULL, deadline = NULL,
                 retries = retries + 1
             WHERE process_id = $1 AND state = 1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// WAITING → FAILED, used for wait-deadline expiry and the workflow
    /// failure cascade. Never touches a process an executor has claimed.
    pub async fn fail_waiting(id: &str, pool: &PgPool) -> Result<bool, ServerError> {
        let result = sqlx::query(
            "UPDATE processes
             SET state = 3, end_time = NOW()
             WHERE process_id = $1 AND state = 0 AND is_assigned = FALSE",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Make a held workflow process assignable.
    pub async fn release_hold(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        sqlx::query(
            "UPDATE processes SET wait_for_parents = FALSE WHERE process_id = $1 AND state = 0",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn remove(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM attributes WHERE target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM processes WHERE process_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "process <{id}> does not exist"
            )));
        }
        Ok(())
    }

    /// Retry budget left after `retries` attempts?
    pub fn can_retry(&self) -> bool {
        self.spec.max_retries == -1 || self.retries < self.spec.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_json(max_wait_time: i64) -> FunctionSpec {
        serde_json::from_str(&format!(
            r#"{{"funcname":"echo","colonyname":"dev","maxwaittime":{max_wait_time}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_submit_stamps_wait_deadline() {
        let p = Process::from_spec(spec_json(60), "i", "alice");
        assert_eq!(p.state, ProcessState::Waiting);
        assert!(!p.is_assigned);
        let deadline = p.deadline.expect("deadline should be set");
        assert!(deadline > p.submission_time);

        let p = Process::from_spec(spec_json(0), "i", "alice");
        assert!(p.deadline.is_none());
    }

    #[test]
    fn test_process_state_wire_format() {
        assert_eq!(serde_json::to_string(&ProcessState::Success).unwrap(), "2");
        let state: ProcessState = serde_json::from_str("3").unwrap();
        assert_eq!(state, ProcessState::Failed);
        assert!(serde_json::from_str::<ProcessState>("9").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessState::Waiting.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(ProcessState::Success.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
    }

    #[test]
    fn test_retry_budget() {
        let mut p = Process::from_spec(spec_json(0), "i", "alice");
        p.spec.max_retries = 2;
        assert!(p.can_retry());
        p.retries = 2;
        assert!(!p.can_retry());

        p.spec.max_retries = -1;
        p.retries = 1000;
        assert!(p.can_retry());
    }

    #[test]
    fn test_process_json_roundtrip() {
        let p = Process::from_spec(spec_json(60), "i".repeat(64).as_str(), "alice");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"processid\""));
        assert!(json.contains("\"waitforparents\""));
        let back: Process = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
