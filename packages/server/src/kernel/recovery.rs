//! Recovery loop: deadline enforcement for stuck processes.
//!
//! A single server-wide background worker scans for running processes past
//! their exec deadline and either resets them for retry or fails them, and
//! for waiting processes past their wait deadline. Every action is a CAS
//! on the process state, so an interleaved close simply makes the action
//! miss.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::common::ServerError;
use crate::domains::process::{Attribute, AttributeType, Process, ProcessState};
use crate::domains::workflow::runtime;
use crate::kernel::events::EventHub;

/// Background service enforcing process deadlines.
pub struct RecoveryWorker {
    pool: PgPool,
    events: EventHub,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RecoveryWorker {
    pub fn new(
        pool: PgPool,
        events: EventHub,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            events,
            interval,
            shutdown,
        }
    }

    /// Run until shutdown is signalled. The current tick always completes.
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "recovery worker starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "recovery tick failed");
                    }
                }
                _ = self.shutdown.changed() => break,
            }
        }
        info!("recovery worker stopped");
    }

    async fn tick(&self) -> Result<(), ServerError> {
        self.expire_running().await?;
        self.expire_waiting().await?;
        Ok(())
    }

    async fn expire_running(&self) -> Result<(), ServerError> {
        for process in Process::find_running_past_deadline(&self.pool).await? {
            if process.can_retry() {
                if Process::reset(&process.id, &self.pool).await? {
                    info!(
                        process_id = %process.id,
                        retries = process.retries + 1,
                        "process reset, max exec time reached"
                    );
                    // Back on the queue; wake blocked pulls.
                    self.events.publish(&process, ProcessState::Waiting).await;
                }
                continue;
            }

            match Process::close(&process.id, ProcessState::Failed, &self.pool).await {
                Ok(()) => {
                    Attribute::new(
                        &process.id,
                        &process.spec.colony_name,
                        AttributeType::Err,
                        "error",
                        "max exec time reached",
                    )
                    .insert(&self.pool)
                    .await?;
                    warn!(process_id = %process.id, "process failed, max exec time reached");

                    self.events.publish(&process, ProcessState::Failed).await;
                    let outcome =
                        runtime::on_process_closed(&process, ProcessState::Failed, &self.pool)
                            .await?;
                    self.events.publish_outcome(&outcome).await;
                }
                // The executor closed it between the scan and the CAS.
                Err(ServerError::Conflict(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn expire_waiting(&self) -> Result<(), ServerError> {
        for process in Process::find_waiting_past_deadline(&self.pool).await? {
            if !Process::fail_waiting(&process.id, &self.pool).await? {
                continue;
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

            self.events.publish(&process, ProcessState::Failed).await;
            let outcome =
                runtime::on_process_closed(&process, ProcessState::Failed, &self.pool).await?;
            self.events.publish_outcome(&outcome).await;
        }
        Ok(())
    }
}
