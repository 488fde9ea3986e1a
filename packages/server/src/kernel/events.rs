//! In-process pub/sub hub for process lifecycle events.
//!
//! Topic-keyed broadcast channels fan process events out to waiting
//! executors: blocked `assign` calls wait for the next assignable process
//! in their colony, and subscription handlers wait for a specific process
//! to reach a state. Producers publish after the database commit, never
//! before; a missed or duplicated wake is harmless because every waiter
//! re-reads the database when it wakes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};

use crate::common::ServerError;
use crate::domains::process::{Process, ProcessState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    #[serde(rename = "processid")]
    pub process_id: String,
    #[serde(rename = "colonyname")]
    pub colony_name: String,
    #[serde(rename = "executortype")]
    pub executor_type: String,
    pub state: ProcessState,
}

impl ProcessEvent {
    pub fn from_process(process: &Process, state: ProcessState) -> Self {
        Self {
            process_id: process.id.clone(),
            colony_name: process.spec.colony_name.clone(),
            executor_type: process.spec.executor_type.clone(),
            state,
        }
    }
}

/// How a wait ended.
#[derive(Debug)]
pub enum WaitOutcome {
    /// A matching event arrived.
    Event(ProcessEvent),
    /// The receiver lagged behind the channel; the caller should re-read
    /// the database.
    Wake,
    Timeout,
    Shutdown,
}

/// Thread-safe, cloneable hub keyed by string topics.
#[derive(Clone)]
pub struct EventHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ProcessEvent>>>>,
    /// Executor IDs with an outstanding wait; a subscriber gets one wait
    /// point at a time.
    waiting: Arc<StdMutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
    capacity: usize,
}

fn process_topic(process_id: &str) -> String {
    format!("process:{process_id}")
}

fn colony_topic(colony_name: &str, executor_type: &str) -> String {
    format!("colony:{colony_name}:{executor_type}")
}

impl EventHub {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self::with_capacity(shutdown, 256)
    }

    pub fn with_capacity(shutdown: watch::Receiver<bool>, capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            waiting: Arc::new(StdMutex::new(HashSet::new())),
            shutdown,
            capacity,
        }
    }

    /// Publish a process event. No-op if nobody is listening.
    pub async fn publish(&self, process: &Process, state: ProcessState) {
        let event = ProcessEvent::from_process(process, state);
        let channels = self.channels.read().await;
        for topic in [
            process_topic(&event.process_id),
            colony_topic(&event.colony_name, &event.executor_type),
        ] {
            if let Some(tx) = channels.get(&topic) {
                // Ignore send errors (no active receivers)
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Publish events for a batch of freshly assignable processes.
    pub async fn publish_new_waiting(&self, processes: &[Process]) {
        for process in processes {
            if !process.wait_for_parents {
                self.publish(process, ProcessState::Waiting).await;
            }
        }
    }

    /// Publish everything a workflow close cascaded into: released children
    /// become assignable, cascade-failed descendants reach FAILED.
    pub async fn publish_outcome(&self, outcome: &crate::domains::workflow::runtime::ClosedOutcome) {
        for process in &outcome.released {
            self.publish(process, ProcessState::Waiting).await;
        }
        for process in &outcome.cascade_failed {
            self.publish(process, ProcessState::Failed).await;
        }
    }

    /// Wait point on a single process's lifecycle.
    pub async fn subscribe_process(&self, process_id: &str) -> Waiter {
        let rx = self.subscribe_topic(&process_topic(process_id)).await;
        Waiter {
            receivers: vec![rx],
            shutdown: self.shutdown.clone(),
        }
    }

    /// Wait point on a colony's process events, matching the given
    /// executor type and untyped specs.
    pub async fn subscribe_colony(&self, colony_name: &str, executor_type: &str) -> Waiter {
        let mut receivers = vec![
            self.subscribe_topic(&colony_topic(colony_name, executor_type))
                .await,
        ];
        if !executor_type.is_empty() {
            receivers.push(self.subscribe_topic(&colony_topic(colony_name, "")).await);
        }
        Waiter {
            receivers,
            shutdown: self.shutdown.clone(),
        }
    }

    async fn subscribe_topic(&self, topic: &str) -> broadcast::Receiver<ProcessEvent> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Register an outstanding wait for an executor. A second concurrent
    /// wait by the same executor is rejected.
    pub fn begin_wait(&self, executor_id: &str) -> Result<WaitGuard, ServerError> {
        let mut waiting = self.waiting.lock().expect("wait registry poisoned");
        if !waiting.insert(executor_id.to_string()) {
            return Err(ServerError::Conflict(format!(
                "executor <{executor_id}> already has an outstanding subscription"
            )));
        }
        Ok(WaitGuard {
            registry: self.waiting.clone(),
            executor_id: executor_id.to_string(),
        })
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

/// RAII registration of an outstanding wait.
pub struct WaitGuard {
    registry: Arc<StdMutex<HashSet<String>>>,
    executor_id: String,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if let Ok(mut waiting) = self.registry.lock() {
            waiting.remove(&self.executor_id);
        }
    }
}

/// A registered wait point over one or two topics.
pub struct Waiter {
    receivers: Vec<broadcast::Receiver<ProcessEvent>>,
    shutdown: watch::Receiver<bool>,
}

impl Waiter {
    /// Block until an event matching `state` arrives, the timeout expires,
    /// or the server shuts down.
    pub async fn wait(&mut self, state: Option<ProcessState>, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            let (first, rest) = match self.receivers.split_first_mut() {
                Some(split) => split,
                None => return WaitOutcome::Timeout,
            };
            let has_second = !rest.is_empty();

            let received = tokio::select! {
                _ = &mut sleep => return WaitOutcome::Timeout,
                _ = self.shutdown.changed() => return WaitOutcome::Shutdown,
                res = first.recv() => res,
                res = async { rest[0].recv().await }, if has_second => res,
            };

            match received {
                Ok(event) => {
                    if state.is_none() || state == Some(event.state) {
                        return WaitOutcome::Event(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => return WaitOutcome::Wake,
                Err(broadcast::error::RecvError::Closed) => return WaitOutcome::Shutdown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::process::FunctionSpec;

    fn hub() -> (watch::Sender<bool>, EventHub) {
        let (tx, rx) = watch::channel(false);
        (tx, EventHub::new(rx))
    }

    fn process(colony: &str, executor_type: &str) -> Process {
        let spec: FunctionSpec = serde_json::from_str(&format!(
            r#"{{"funcname":"echo","colonyname":"{colony}","executortype":"{executor_type}"}}"#
        ))
        .unwrap();
        Process::from_spec(spec, "i", "test")
    }

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let (_tx, hub) = hub();
        let p = process("dev", "worker");

        let mut waiter = hub.subscribe_process(&p.id).await;
        hub.publish(&p, ProcessState::Success).await;

        match waiter
            .wait(Some(ProcessState::Success), Duration::from_secs(1))
            .await
        {
            WaitOutcome::Event(event) => assert_eq!(event.process_id, p.id),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_filter_skips_other_states() {
        let (_tx, hub) = hub();
        let p = process("dev", "worker");

        let mut waiter = hub.subscribe_process(&p.id).await;
        hub.publish(&p, ProcessState::Running).await;

        match waiter
            .wait(Some(ProcessState::Success), Duration::from_millis(50))
            .await
        {
            WaitOutcome::Timeout => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_colony_waiter_matches_untyped_specs() {
        let (_tx, hub) = hub();
        let untyped = process("dev", "");

        let mut waiter = hub.subscribe_colony("dev", "worker").await;
        hub.publish(&untyped, ProcessState::Waiting).await;

        match waiter
            .wait(Some(ProcessState::Waiting), Duration::from_secs(1))
            .await
        {
            WaitOutcome::Event(event) => assert_eq!(event.process_id, untyped.id),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_no_subscribers_is_noop() {
        let (_tx, hub) = hub();
        // Should not panic
        hub.publish(&process("dev", "worker"), ProcessState::Waiting)
            .await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let (tx, hub) = hub();
        let mut waiter = hub.subscribe_colony("dev", "worker").await;

        let handle = tokio::spawn(async move {
            waiter
                .wait(Some(ProcessState::Waiting), Duration::from_secs(30))
                .await
        });
        tx.send(true).unwrap();

        match handle.await.unwrap() {
            WaitOutcome::Shutdown => {}
            other => panic!("expected shutdown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_wait_rejected() {
        let (_tx, hub) = hub();
        let guard = hub.begin_wait("executor-1").unwrap();
        assert!(hub.begin_wait("executor-1").is_err());
        drop(guard);
        assert!(hub.begin_wait("executor-1").is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_channels() {
        let (_tx, hub) = hub();
        let waiter = hub.subscribe_process("p1").await;

        assert_eq!(hub.channels.read().await.len(), 1);

        drop(waiter);
        hub.cleanup().await;

        assert_eq!(hub.channels.read().await.len(), 0);
    }
}
