//! Observability events emitted by the queue, the worker and the store.
//!
//! Components hold an `Arc<dyn EventSink>` and never depend on what the sink
//! does with an event; logging and metrics are both plain sinks.

use crate::{Priority, TaskId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Task accepted by the queue
    Enqueued { task_id: TaskId, priority: Priority },

    /// Worker handed the task to the processor
    Started { task_id: TaskId, priority: Priority },

    /// Processor returned success
    Completed { task_id: TaskId, elapsed: Duration },

    /// Processor returned or raised a failure
    Failed {
        task_id: TaskId,
        elapsed: Duration,
        error: String,
    },

    /// A durable write or read did not go through
    StorageError {
        task_id: Option<TaskId>,
        error: String,
    },
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Enqueued { .. } => "task_enqueued",
            TaskEvent::Started { .. } => "task_started",
            TaskEvent::Completed { .. } => "task_completed",
            TaskEvent::Failed { .. } => "task_failed",
            TaskEvent::StorageError { .. } => "storage_error",
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Enqueued { task_id, .. }
            | TaskEvent::Started { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. } => Some(*task_id),
            TaskEvent::StorageError { task_id, .. } => *task_id,
        }
    }
}

/// Receiver of task lifecycle events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}

/// Writes every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Enqueued { task_id, priority } => {
                info!(event = event.name(), %task_id, %priority, "Task enqueued");
            }
            TaskEvent::Started { task_id, priority } => {
                info!(event = event.name(), %task_id, %priority, "Task started");
            }
            TaskEvent::Completed { task_id, elapsed } => {
                info!(
                    event = event.name(),
                    %task_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
            }
            TaskEvent::Failed { task_id, elapsed, error } => {
                warn!(
                    event = event.name(),
                    %task_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    %error,
                    "Task failed"
                );
            }
            TaskEvent::StorageError { task_id, error } => match task_id {
                Some(task_id) => error!(event = event.name(), %task_id, %error, "Storage error"),
                None => error!(event = event.name(), %error, "Storage error"),
            },
        }
    }
}

/// Broadcasts each event to several sinks in order
#[derive(Default, Clone)]
pub struct EventFanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for EventFanout {
    fn emit(&self, event: &TaskEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Keeps every event in memory; handy in tests and for inspection tools.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TaskEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().clone()
    }

    /// Names of the events received for one task, in arrival order
    pub fn names_for(&self, task_id: TaskId) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.task_id() == Some(task_id))
            .map(TaskEvent::name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &TaskEvent) {
        self.events.lock().push(event.clone());
    }
}
