//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;

use taskhub_cache::memory::MemoryCacheProvider;
use taskhub_core::config::scheduler::SchedulerConfig;
use taskhub_core::config::worker::WorkerConfig;
use taskhub_entity::{Lane, TaskRecord};
use taskhub_queue::memory::MemoryTaskQueue;
use taskhub_worker::{Scheduler, TaskExecutionError, TaskExecutor, TaskHandler, WorkerRunner};

/// Queue and store shared by every node of a test cluster.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Shared task queue
    pub queue: Arc<MemoryTaskQueue>,
    /// Shared key-value store
    pub store: Arc<MemoryCacheProvider>,
}

impl Cluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self {
            queue: Arc::new(MemoryTaskQueue::new()),
            store: Arc::new(MemoryCacheProvider::default()),
        }
    }

    /// Start a node with the given scheduler configuration and handlers
    pub fn node(&self, config: SchedulerConfig, handlers: Vec<Arc<dyn TaskHandler>>) -> TestNode {
        TestNode::start(self, config, handlers)
    }
}

/// One scheduler plus the runners its role asks for
#[derive(Debug)]
pub struct TestNode {
    /// The node's scheduler
    pub scheduler: Scheduler,
    cancel: watch::Sender<bool>,
    runners: Vec<tokio::task::JoinHandle<()>>,
}

impl TestNode {
    fn start(
        cluster: &Cluster,
        config: SchedulerConfig,
        handlers: Vec<Arc<dyn TaskHandler>>,
    ) -> Self {
        let role = config.role;
        let scheduler = Scheduler::new(cluster.queue.clone(), cluster.store.clone(), config);

        let mut executor = TaskExecutor::new();
        executor.register(scheduler.reaper_handler());
        for handler in handlers {
            executor.register(handler);
        }
        let executor = Arc::new(executor);

        let mut lanes = Vec::new();
        if role.serves_work() {
            lanes.push(Lane::Work);
        }
        if role.serves_push() {
            lanes.push(Lane::Push);
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let runners = lanes
            .into_iter()
            .map(|lane| {
                let runner = WorkerRunner::new(
                    cluster.queue.clone(),
                    Arc::clone(&executor),
                    worker_config(),
                    format!("test-{lane}"),
                )
                .with_lanes(vec![lane]);
                let rx = cancel_rx.clone();
                tokio::spawn(async move { runner.run(rx).await })
            })
            .collect();

        Self {
            scheduler,
            cancel,
            runners,
        }
    }

    /// Shut the scheduler down and wait for the runners to drain
    pub async fn stop(self) {
        let _ = self.scheduler.shutdown().await;
        self.cancel.send_replace(true);
        for runner in self.runners {
            let _ = runner.await;
        }
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        poll_interval_ms: 5,
        drain_timeout_seconds: 1,
    }
}

/// Returns the context's `result` field, or fails with its `err` field.
#[derive(Debug)]
pub struct ScriptedHandler {
    event_id: String,
}

impl ScriptedHandler {
    /// Create a handler for `event_id`
    pub fn new(event_id: &str) -> Arc<Self> {
        Arc::new(Self {
            event_id: event_id.to_string(),
        })
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn execute(&self, task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError> {
        if let Some(ms) = task.context.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(err) = task.context.get("err") {
            return Err(TaskExecutionError::Failed(err.clone()));
        }
        Ok(task.context.get("result").cloned())
    }
}

/// Records every execution and the peak number of overlapping ones.
#[derive(Debug)]
pub struct CountingHandler {
    event_id: String,
    hold: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

impl CountingHandler {
    /// Create a handler for `event_id` that takes `hold` per execution
    pub fn new(event_id: &str, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            event_id: event_id.to_string(),
            hold,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    /// Number of executions so far
    pub fn runs(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Peak number of overlapping executions
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Smallest gap between consecutive execution starts
    pub fn min_gap(&self) -> Option<Duration> {
        let started = self.started.lock().unwrap();
        started.windows(2).map(|pair| pair[1] - pair[0]).min()
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn execute(&self, _task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError> {
        self.started.lock().unwrap().push(Instant::now());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(json!({ "ok": true })))
    }
}
