//! Task executor that dispatches claimed records to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing;

use taskhub_core::error::AppError;
use taskhub_entity::TaskRecord;

/// Trait for task handler implementations
#[async_trait]
pub trait TaskHandler: Send + Sync + std::fmt::Debug {
    /// Get the event ID this handler processes
    fn event_id(&self) -> &str;

    /// Execute the task with the record's context
    async fn execute(&self, task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError>;
}

/// Error from task execution
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutionError {
    /// The handler reported an error payload; it is stored as the record's `err`
    #[error("Task failed: {0}")]
    Failed(Value),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl TaskExecutionError {
    /// Create a failure carrying a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Failed(Value::String(message.into()))
    }

    /// The payload stored in the record's `err` field.
    pub fn into_payload(self) -> Value {
        match self {
            Self::Failed(payload) => payload,
            Self::Internal(err) => Value::String(err.to_string()),
        }
    }
}

/// Dispatches tasks to the appropriate handler based on event ID
#[derive(Debug)]
pub struct TaskExecutor {
    /// Registered handlers by event ID
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskExecutor {
    /// Create a new task executor
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a task handler
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let event_id = handler.event_id().to_string();
        tracing::info!("Registered task handler for event '{}'", event_id);
        self.handlers.insert(event_id, handler);
    }

    /// Execute a task by dispatching to the correct handler
    pub async fn execute(&self, task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError> {
        let handler = self.handlers.get(&task.event_id).ok_or_else(|| {
            TaskExecutionError::message(format!(
                "No handler registered for event '{}'",
                task.event_id
            ))
        })?;

        tracing::info!(
            "Executing task: id={}, event='{}', lane={}",
            task.id,
            task.event_id,
            task.lane
        );

        handler.execute(task).await
    }

    /// Check if a handler is registered for an event
    pub fn has_handler(&self, event_id: &str) -> bool {
        self.handlers.contains_key(event_id)
    }

    /// Get the list of registered event IDs
    pub fn registered_events(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}
