//! Assignment engine: matching waiting processes to pulling executors.
//!
//! Correctness rests on the database CAS — the claim UPDATE re-checks
//! `state = WAITING AND is_assigned = FALSE`, so two racing pulls can never
//! both take one process. A per-colony mutex additionally serializes
//! candidate selection inside this server, which keeps racing pulls from
//! churning through each other's candidate batches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::ServerError;
use crate::domains::executor::Executor;
use crate::domains::process::{Attribute, AttributeType, Process, ProcessState};
use crate::domains::workflow::runtime;
use crate::kernel::events::{EventHub, WaitOutcome};

const CANDIDATE_BATCH: i64 = 10;

pub struct AssignmentEngine {
    pool: PgPool,
    events: EventHub,
    colony_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AssignmentEngine {
    pub fn new(pool: PgPool, events: EventHub) -> Self {
        Self {
            pool,
            events,
            colony_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn colony_lock(&self, colony_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.colony_locks.lock().await;
        locks
            .entry(colony_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pull one process for an executor, blocking up to `timeout_secs` when
    /// nothing is assignable right away. Returns `None` on timeout.
    pub async fn assign(
        &self,
        colony_name: &str,
        executor: &Executor,
        available_cpu: &str,
        available_memory: &str,
        timeout_secs: i64,
    ) -> Result<Option<Process>, ServerError> {
        // Subscribe before the first scan so an event between scan and wait
        // is never lost.
        let mut waiter = self
            .events
            .subscribe_colony(colony_name, &executor.executor_type)
            .await;

        if let Some(process) = self
            .try_assign(colony_name, executor, available_cpu, available_memory)
            .await?
        {
            return Ok(Some(process));
        }
        if timeout_secs <= 0 {
            return Ok(None);
        }

        // One outstanding blocking pull per executor.
        let _guard = self.events.begin_wait(&executor.id)?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs as u64);

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match waiter.wait(Some(ProcessState::Waiting), remaining).await {
                WaitOutcome::Event(_) | WaitOutcome::Wake => {
                    if let Some(process) = self
                        .try_assign(colony_name, executor, available_cpu, available_memory)
                        .await?
                    {
                        return Ok(Some(process));
                    }
                }
                WaitOutcome::Timeout | WaitOutcome::Shutdown => return Ok(None),
            }
        }
    }

    /// Single non-blocking assignment attempt.
    pub async fn try_assign(
        &self,
        colony_name: &str,
        executor: &Executor,
        available_cpu: &str,
        available_memory: &str,
    ) -> Result<Option<Process>, ServerError> {
        let lock = self.colony_lock(colony_name).await;
        let _serialized = lock.lock().await;

        let candidates = Process::find_unassigned_candidates(
            colony_name,
            &executor.id,
            &executor.executor_type,
            CANDIDATE_BATCH,
            &self.pool,
        )
        .await?;

        let now = chrono::Utc::now();
        for candidate in candidates {
            // Expire candidates that waited past their deadline.
            if candidate.deadline.is_some_and(|d| d < now) {
                self.expire_waiting(&candidate).await?;
                continue;
            }

            // Advisory resource hints, compared lexicographically.
            if hint_too_small(available_cpu, &candidate.spec.conditions.cpu)
                || hint_too_small(available_memory, &candidate.spec.conditions.memory)
            {
                continue;
            }

            let claimed = Process::try_assign(
                &candidate.id,
                &executor.id,
                candidate.spec.max_exec_time,
                &self.pool,
            )
            .await?;
            if !claimed {
                // Lost the race; try the next candidate.
                continue;
            }

            let process = Process::find_by_id(&candidate.id, &self.pool)
                .await?
                .ok_or_else(|| {
                    ServerError::Internal("assigned process vanished".to_string())
                })?;
            debug!(
                process_id = %process.id,
                executor_id = %executor.id,
                "process assigned"
            );
            self.events.publish(&process, ProcessState::Running).await;
            return Ok(Some(process));
        }

        Ok(None)
    }

    /// WAITING → FAILED for a process whose max wait time ran out, with the
    /// workflow consequences.
    async fn expire_waiting(&self, process: &Process) -> Result<(), ServerError> {
        if !Process::fail_waiting(&process.id, &self.pool).await? {
            return Ok(());
        }
        Attribute::new(
            &process.id,
            &process.spec.colony_name,
            AttributeType::Err,
            "error",
            "max waittime reached",
        )
        .insert(&self.pool)
        .await?;
        info!(process_id = %process.id, "process failed, max waittime reached");

        self.events.publish(process, ProcessState::Failed).await;
        let outcome =
            runtime::on_process_closed(process, ProcessState::Failed, &self.pool).await?;
        self.events.publish_outcome(&outcome).await;
        Ok(())
    }
}

/// True when both sides carry a hint and the offered resource sorts below
/// the required one.
fn hint_too_small(available: &str, required: &str) -> bool {
    !available.is_empty() && !required.is_empty() && available < required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_comparison_is_advisory() {
        // Missing hints on either side never disqualify.
        assert!(!hint_too_small("", "2000m"));
        assert!(!hint_too_small("1000m", ""));
        assert!(!hint_too_small("", ""));
    }

    #[test]
    fn test_hint_lexicographic_order() {
        assert!(hint_too_small("1000m", "2000m"));
        assert!(!hint_too_small("2000m", "2000m"));
        assert!(!hint_too_small("3000m", "2000m"));
    }
}
