//! Generator engine: periodic workflow instantiation.
//!
//! A single background worker scans all generators every tick and fires
//! those whose argument queue reached the trigger threshold, or whose
//! timeout elapsed with a non-empty queue. Firing drains the queue and
//! materializes the stored workflow with the drained args attached to the
//! root processes.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info};

use crate::common::ServerError;
use crate::domains::generator::Generator;
use crate::domains::workflow::{runtime, WorkflowSpec};
use crate::kernel::events::EventHub;

pub struct GeneratorWorker {
    pool: PgPool,
    events: EventHub,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl GeneratorWorker {
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

    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "generator worker starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "generator tick failed");
                    }
                }
                _ = self.shutdown.changed() => break,
            }
        }
        info!("generator worker stopped");
    }

    async fn tick(&self) -> Result<(), ServerError> {
        let now = chrono::Utc::now();
        for generator in Generator::find_all(&self.pool).await? {
            if !generator.due(now) {
                continue;
            }
            if let Err(e) = self.fire(&generator).await {
                error!(
                    generator_id = %generator.id,
                    error = %e,
                    "generator failed to fire"
                );
            }
        }
        Ok(())
    }

    async fn fire(&self, generator: &Generator) -> Result<(), ServerError> {
        let spec = WorkflowSpec::parse(&generator.workflow_spec)?;
        let args = generator.drain(&self.pool).await?;
        if args.is_empty() {
            // Another instance drained the queue between the due check and
            // the drain; nothing to instantiate.
            return Ok(());
        }

        let (graph, processes) =
            runtime::materialize(&spec, &args, &generator.id, &generator.name, &self.pool).await?;
        self.events.publish_new_waiting(&processes).await;

        info!(
            generator_id = %generator.id,
            processgraph_id = %graph.id,
            args = args.len(),
            "generator fired"
        );
        Ok(())
    }
}
