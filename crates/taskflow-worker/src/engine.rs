use crate::config::TaskFlowConfig;
use crate::error::{Result, TaskFlowError, WorkerError};
use crate::metrics::TaskMetrics;
use crate::processor::TaskProcessor;
use crate::worker::{Worker, WorkerState};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskflow_core::{
    EventFanout, EventSink, LogSink, Priority, TaskError, TaskId, TaskPayload, TaskRecord,
    TaskStatus,
};
use taskflow_dispatch::{recover, PriorityDispatchQueue, QueueStats, RecoveryReport};
use taskflow_persistence::{DurableStore, StoreError};
use tracing::{info, warn};

/// Store, queue and worker wired together.
///
/// Every change is written to the store before it becomes visible in the
/// queue, so a worker can never finish a task whose pending record has not
/// been saved yet.
pub struct TaskFlow {
    config: TaskFlowConfig,
    queue: Arc<PriorityDispatchQueue>,
    store: Arc<DurableStore>,
    worker: Worker,
    metrics: Arc<TaskMetrics>,
    recovery: RecoveryReport,
    // Held for a whole retry so concurrent retries of one task never
    // interleave their saves.
    retry_lock: Mutex<()>,
}

impl TaskFlow {
    /// Open the store under `config.storage`, rebuild the queue from it and
    /// prepare (but do not start) the worker.
    pub fn open(config: TaskFlowConfig, processor: Arc<dyn TaskProcessor>) -> Result<Self> {
        let metrics = Arc::new(TaskMetrics::new()?);
        let events: Arc<dyn EventSink> = Arc::new(
            EventFanout::new()
                .with(Arc::new(LogSink))
                .with(metrics.clone()),
        );

        let store = Arc::new(
            DurableStore::open(config.to_store_config())?.with_event_sink(events.clone()),
        );
        let queue = Arc::new(PriorityDispatchQueue::with_event_sink(events.clone()));
        let recovery = recover(&store, &queue)?;

        let worker = Worker::new(&config.worker, queue.clone(), store.clone(), processor)
            .with_event_sink(events);

        info!(
            "Opened task store at {} ({} pending, {} finished)",
            config.storage.data_dir.display(),
            recovery.restored,
            recovery.terminal
        );

        Ok(TaskFlow {
            config,
            queue,
            store,
            worker,
            metrics,
            recovery,
            retry_lock: Mutex::new(()),
        })
    }

    /// Validate, persist and enqueue a new task.
    pub fn submit(
        &self,
        name: &str,
        priority: u8,
        payload: TaskPayload,
        max_retries: u32,
    ) -> Result<TaskId> {
        let priority = Priority::new(priority)?;
        let record = TaskRecord::new(name, priority, payload, max_retries)?;
        let task_id = record.id;

        self.store.save(&record)?;
        if let Err(e) = self.queue.submit(record) {
            if let Err(cleanup) = self.store.delete(&task_id) {
                warn!(%task_id, "Failed to remove rejected task: {}", cleanup);
            }
            return Err(e.into());
        }
        Ok(task_id)
    }

    /// Live status from the queue, falling back to the store for records the
    /// queue does not hold.
    pub fn status(&self, task_id: TaskId) -> Result<TaskRecord> {
        match self.queue.get_status(task_id) {
            Ok(record) => Ok(record),
            Err(TaskError::NotFound(_)) => match self.store.load(&task_id) {
                Ok(record) => Ok(record),
                Err(StoreError::NotFound(_)) => Err(TaskError::NotFound(task_id).into()),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        self.queue.tasks_by_status(status)
    }

    /// Remove a pending task from the queue and from disk.
    pub fn cancel(&self, task_id: TaskId) -> Result<TaskRecord> {
        let record = self.queue.cancel(task_id)?;
        self.store.delete(&task_id)?;
        info!(%task_id, "Cancelled task");
        Ok(record)
    }

    /// Send a failed task with retries left back to the queue.
    ///
    /// The pending record is saved before the queue hands the task to a
    /// worker. Failed tasks are never touched by the worker, so only another
    /// retry can race this one and the lock rules that out.
    pub fn retry(&self, task_id: TaskId) -> Result<TaskRecord> {
        let _guard = self.retry_lock.lock();
        let current = self.queue.get_status(task_id)?;
        let mut next = current.clone();
        next.requeue()?;
        self.store.save(&next)?;

        match self.queue.requeue(task_id) {
            Ok(record) => {
                info!(%task_id, retry_count = record.retry_count, "Retrying task");
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback) = self.store.save(&current) {
                    warn!(%task_id, "Failed to roll back retried task: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    /// Snapshot the store into a timestamped archive
    pub fn backup(&self) -> Result<PathBuf> {
        Ok(self.store.backup(Utc::now())?)
    }

    /// Replay an archive into the store. The queue is not touched: restored
    /// records are dispatched from the next `open`.
    pub fn restore(&self, path: &Path) -> Result<usize> {
        Ok(self.store.restore(path)?)
    }

    pub fn start(&self) -> Result<()> {
        Ok(self.worker.start()?)
    }

    /// Stop the worker (waiting for in-flight tasks when `wait` is set) and
    /// close the queue.
    pub fn shutdown(&self, wait: bool) -> Result<()> {
        match self.worker.stop(wait) {
            Ok(()) | Err(WorkerError::NotRunning) => {}
            Err(e) => return Err(TaskFlowError::from(e)),
        }
        self.queue.close();
        info!("Task flow shut down");
        Ok(())
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    pub fn config(&self) -> &TaskFlowConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<PriorityDispatchQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }
}
