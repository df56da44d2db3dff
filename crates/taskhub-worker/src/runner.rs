//! Worker runner: main loop that claims queued tasks and executes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing;

use taskhub_core::config::worker::WorkerConfig;
use taskhub_entity::{Lane, TaskOutcome};
use taskhub_queue::TaskQueue;

use crate::executor::TaskExecutor;

/// Worker runner that polls lanes and executes claimed tasks
#[derive(Debug)]
pub struct WorkerRunner {
    /// Task queue for claiming
    queue: Arc<dyn TaskQueue>,
    /// Task executor for dispatching
    executor: Arc<TaskExecutor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Worker identifier
    worker_id: String,
    /// Lanes to poll (in priority order)
    lanes: Vec<Lane>,
}

impl WorkerRunner {
    /// Create a new worker runner serving both lanes
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        executor: Arc<TaskExecutor>,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            worker_id,
            lanes: Lane::ALL.to_vec(),
        }
    }

    /// Set the lanes to poll
    pub fn with_lanes(mut self, lanes: Vec<Lane>) -> Self {
        self.lanes = lanes;
        self
    }

    /// Start the worker runner; runs until the cancel signal is received
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            "Worker '{}' started with concurrency={}, poll_interval={}ms, lanes={:?}",
            self.worker_id,
            self.config.concurrency,
            self.config.poll_interval_ms,
            self.lanes
        );

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *cancel.borrow() {
                tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                break;
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                        break;
                    }
                }
                claimed = self.poll_and_execute(&semaphore) => {
                    if claimed {
                        continue;
                    }
                    tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                tracing::info!("Worker '{}' shutting down", self.worker_id);
                                break;
                            }
                        }
                        _ = time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(
            "Worker '{}' waiting for in-flight tasks to complete...",
            self.worker_id
        );

        let drain = Duration::from_secs(self.config.drain_timeout_seconds);
        let _ = time::timeout(drain, semaphore.acquire_many(concurrency as u32)).await;

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    /// Claim a task from the first lane that has one and execute it.
    ///
    /// Returns `true` if a task was claimed.
    async fn poll_and_execute(&self, semaphore: &Arc<tokio::sync::Semaphore>) -> bool {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::trace!("All worker slots occupied, waiting...");
                return false;
            }
        };

        for lane in &self.lanes {
            match self.queue.claim_next(*lane).await {
                Ok(Some(task)) => {
                    let queue = Arc::clone(&self.queue);
                    let executor = Arc::clone(&self.executor);

                    tokio::spawn(async move {
                        let _permit = permit;
                        let task_id = task.id;

                        let outcome = match executor.execute(&task).await {
                            Ok(result) => {
                                tracing::info!("Task {} completed successfully", task_id);
                                TaskOutcome::Success(result.unwrap_or_default())
                            }
                            Err(e) => {
                                tracing::warn!(
                                    "Task {} ('{}') failed: {}",
                                    task_id,
                                    task.event_id,
                                    e
                                );
                                TaskOutcome::Failure(e.into_payload())
                            }
                        };

                        match queue.finish(task_id, outcome).await {
                            Ok(true) => {}
                            Ok(false) => tracing::debug!(
                                "Task {} finished or was removed before its outcome was stored",
                                task_id
                            ),
                            Err(e) => tracing::error!(
                                "Failed to store outcome of task {}: {}",
                                task_id,
                                e
                            ),
                        }
                    });
                    return true;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to claim task from {} lane: {}", lane, e);
                }
            }
        }

        drop(permit);
        tracing::trace!("No tasks available in lanes {:?}", self.lanes);
        false
    }
}
