//! TaskHub node: a distributed task scheduler process.
//!
//! Main entry point that wires the queue, the shared store, the scheduler,
//! and the lane runners together according to the node's role.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use taskhub_cache::CacheManager;
use taskhub_core::config::{AppConfig, NodeRole};
use taskhub_core::error::AppError;
use taskhub_core::traits::cache::CacheProvider;
use taskhub_entity::{Lane, TaskRecord};
use taskhub_queue::{QueueManager, TaskQueue};
use taskhub_worker::{Scheduler, TaskExecutionError, TaskExecutor, TaskHandler, WorkerRunner};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "taskhub-node", version, about = "Distributed task scheduler node")]
struct Args {
    /// Environment overlay loaded on top of `default.toml`
    #[arg(long, env = "TASKHUB_ENV", default_value = "development")]
    env: String,

    /// Directory holding the configuration files
    #[arg(long, env = "TASKHUB_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Override the configured node role
    #[arg(long, value_parser = parse_role)]
    role: Option<NodeRole>,
}

fn parse_role(raw: &str) -> Result<NodeRole, String> {
    match raw {
        "combined" => Ok(NodeRole::Combined),
        "worker" => Ok(NodeRole::Worker),
        "pusher" => Ok(NodeRole::Pusher),
        "client" => Ok(NodeRole::Client),
        other => Err(format!(
            "unknown role '{other}' (expected combined, worker, pusher, or client)"
        )),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match AppConfig::load(&args.config_dir, &args.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(role) = args.role {
        config.scheduler.role = role;
    }

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Node error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main node run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    let role = config.scheduler.role;
    tracing::info!("Starting TaskHub node v{} (role={})", env!("CARGO_PKG_VERSION"), role);

    // ── Step 1: Shared store and queue ───────────────────────────
    let store = Arc::new(CacheManager::new(&config.cache).await?);
    let queue = Arc::new(QueueManager::new(&config.queue).await?);

    if !store.health_check().await? || !queue.health_check().await? {
        return Err(AppError::service_unavailable("Store or queue failed its health check"));
    }
    tracing::info!(
        "Connected to store ({}) and queue ({})",
        config.cache.provider,
        config.queue.provider
    );

    // ── Step 2: Scheduler ────────────────────────────────────────
    let scheduler = Scheduler::new(queue.clone(), store.clone(), config.scheduler.clone());

    // ── Step 3: Lane runners ─────────────────────────────────────
    let mut executor = TaskExecutor::new();
    executor.register(scheduler.reaper_handler());
    executor.register(Arc::new(EchoHandler));
    let executor = Arc::new(executor);

    let mut lanes = Vec::new();
    if role.serves_work() {
        lanes.push(Lane::Work);
    }
    if role.serves_push() {
        lanes.push(Lane::Push);
    }

    let runner_handles: Vec<_> = lanes
        .into_iter()
        .map(|lane| {
            let worker_id = format!("{}-{}-{}", role, lane, std::process::id());
            let runner = WorkerRunner::new(
                queue.clone(),
                Arc::clone(&executor),
                config.worker.clone(),
                worker_id,
            )
            .with_lanes(vec![lane]);
            let cancel = scheduler.shutdown_signal();
            tokio::spawn(async move { runner.run(cancel).await })
        })
        .collect();

    if runner_handles.is_empty() {
        tracing::info!("No lane runners for role '{}'", role);
    }

    // ── Step 4: Recurring tasks ──────────────────────────────────
    scheduler.init().await?;

    // ── Step 5: Wait for shutdown ────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");

    match scheduler.shutdown().await {
        Ok(removed) => tracing::info!("Removed {} scheduled tasks", removed),
        Err(e) => tracing::warn!("Failed to remove scheduled tasks: {}", e),
    }

    for handle in runner_handles {
        if let Err(e) = handle.await {
            tracing::error!("Lane runner panicked: {}", e);
        }
    }

    tracing::info!("TaskHub node stopped");
    Ok(())
}

/// Returns the task's context as its result.
#[derive(Debug)]
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn event_id(&self) -> &str {
        "echo"
    }

    async fn execute(&self, task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError> {
        Ok(Some(task.context.clone()))
    }
}
