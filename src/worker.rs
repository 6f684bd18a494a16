//! Background observation processing
//!
//! Observation writes return immediately; a pool of cooperative poll
//! loops drains the outbox queue, running extract-and-merge for each
//! claimed task. Failures go back through the queue with exponential
//! backoff until the attempt budget runs out. Shutdown is graceful:
//! loops stop claiming and in-flight work gets a bounded wait before
//! being abandoned.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{PersonaKitError, Result};
use crate::extractor::TraitExtractor;
use crate::mindscape::TraitMerger;
use crate::storage::EngineStore;
use crate::types::{Observation, Task};

/// Task type for queued observation processing
pub const TASK_PROCESS_OBSERVATION: &str = "process_observation";

/// Queue-driven observation processor
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn EngineStore>,
    extractor: TraitExtractor,
    merger: TraitMerger,
    config: EngineConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn EngineStore>, config: EngineConfig) -> Self {
        Self {
            extractor: TraitExtractor::new(),
            merger: TraitMerger::new(store.clone()),
            store,
            config,
        }
    }

    /// Persist an observation and enqueue its processing task
    ///
    /// This is the write path callers see; it never blocks on trait
    /// extraction or merging.
    pub async fn ingest_observation(&self, observation: &Observation) -> Result<Task> {
        self.store.put_observation(observation).await?;
        let task = self
            .store
            .enqueue(
                TASK_PROCESS_OBSERVATION,
                json!({"observation_id": observation.id}),
                None,
            )
            .await?;
        debug!(
            observation_id = %observation.id,
            task_id = %task.id,
            "observation ingested"
        );
        Ok(task)
    }

    /// Claim and process one task; returns whether a task was available
    pub async fn run_once(&self) -> Result<bool> {
        let Some(task) = self.store.claim_next().await? else {
            return Ok(false);
        };

        match self.process(&task).await {
            Ok(()) => {
                self.store.complete(task.id).await?;
                debug!(task_id = %task.id, "task completed");
            }
            Err(e) => {
                let backoff = self.config.queue.backoff_secs(task.attempts);
                let retry_after = Utc::now() + ChronoDuration::seconds(backoff as i64);
                let failed = self
                    .store
                    .fail(task.id, &e.to_string(), Some(retry_after))
                    .await?;
                warn!(
                    task_id = %task.id,
                    attempts = failed.attempts,
                    status = %failed.status,
                    error = %e,
                    "task failed"
                );
            }
        }
        Ok(true)
    }

    async fn process(&self, task: &Task) -> Result<()> {
        match task.task_type.as_str() {
            TASK_PROCESS_OBSERVATION => self.process_observation(&task.payload).await,
            other => Err(PersonaKitError::Other(format!(
                "unknown task type: {}",
                other
            ))),
        }
    }

    async fn process_observation(&self, payload: &Value) -> Result<()> {
        let id = payload
            .get("observation_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PersonaKitError::Other("task payload missing observation_id".to_string())
            })?;
        let id = Uuid::parse_str(id)?;

        let observation = self
            .store
            .get_observation(id)
            .await?
            .ok_or_else(|| PersonaKitError::ObservationNotFound(id.to_string()))?;

        let deltas = self
            .extractor
            .extract(observation.observation_type, &observation.content);
        if deltas.is_empty() {
            debug!(observation_id = %id, "no traits extracted");
            return Ok(());
        }

        self.merger.merge(observation.person_id, deltas).await?;
        Ok(())
    }

    /// Start the configured number of poll loops
    pub fn spawn(&self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_interval = Duration::from_secs(self.config.worker.poll_interval_secs);
        let shutdown_timeout = Duration::from_secs(self.config.worker.shutdown_timeout_secs);

        let handles = (0..self.config.worker.workers.max(1))
            .map(|index| {
                let worker = self.clone();
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    info!(worker = index, "worker loop started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        match worker.run_once().await {
                            Ok(true) => continue,
                            Ok(false) => {
                                // Idle; sleep until the next poll or shutdown
                                tokio::select! {
                                    _ = tokio::time::sleep(poll_interval) => {}
                                    _ = shutdown.changed() => break,
                                }
                            }
                            Err(e) => {
                                error!(worker = index, error = %e, "worker poll failed");
                                tokio::select! {
                                    _ = tokio::time::sleep(poll_interval) => {}
                                    _ = shutdown.changed() => break,
                                }
                            }
                        }
                    }
                    info!(worker = index, "worker loop stopped");
                })
            })
            .collect();

        WorkerHandle {
            shutdown_tx,
            handles,
            shutdown_timeout,
        }
    }
}

/// Handle to a running worker pool
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerHandle {
    /// Stop claiming and wait (bounded) for in-flight tasks
    ///
    /// The timeout bounds the wait for the whole pool, not per loop. Loops
    /// still running at the deadline are aborted; their claimed tasks stay
    /// in_progress and surface through the operator view.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        for mut handle in self.handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("worker did not stop within shutdown timeout, aborting");
                handle.abort();
            }
        }
        info!("worker pool stopped");
    }
}
