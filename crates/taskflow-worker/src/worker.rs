use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::processor::{run_processor, TaskProcessor};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use taskflow_core::{EventSink, LogSink, TaskEvent, TaskRecord};
use taskflow_dispatch::PriorityDispatchQueue;
use taskflow_persistence::DurableStore;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

struct Lifecycle {
    state: WorkerState,
    /// Loop threads that have not exited yet
    live: usize,
    handles: Vec<JoinHandle<()>>,
}

struct LifecycleCell {
    inner: Mutex<Lifecycle>,
    exited: Condvar,
}

/// Everything a loop thread needs; cloned into each thread
#[derive(Clone)]
struct LoopContext {
    queue: Arc<PriorityDispatchQueue>,
    store: Arc<DurableStore>,
    processor: Arc<dyn TaskProcessor>,
    events: Arc<dyn EventSink>,
    dequeue_timeout: Duration,
    lifecycle: Arc<LifecycleCell>,
}

/// Pool of loop threads that pull tasks from the queue, run the processor
/// and record the outcome in the queue and then in the store.
pub struct Worker {
    context: LoopContext,
    concurrency: usize,
}

impl Worker {
    pub fn new(
        config: &WorkerConfig,
        queue: Arc<PriorityDispatchQueue>,
        store: Arc<DurableStore>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        Worker {
            context: LoopContext {
                queue,
                store,
                processor,
                events: Arc::new(LogSink),
                dequeue_timeout: config.dequeue_timeout(),
                lifecycle: Arc::new(LifecycleCell {
                    inner: Mutex::new(Lifecycle {
                        state: WorkerState::Stopped,
                        live: 0,
                        handles: Vec::new(),
                    }),
                    exited: Condvar::new(),
                }),
            },
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.context.events = events;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.context.lifecycle.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the loop threads. Fails with `AlreadyRunning` unless stopped.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut lifecycle = self.context.lifecycle.inner.lock();
        if lifecycle.state != WorkerState::Stopped {
            return Err(WorkerError::AlreadyRunning);
        }

        // Threads from a previous run have all passed their exit guard.
        for handle in lifecycle.handles.drain(..) {
            let _ = handle.join();
        }

        lifecycle.state = WorkerState::Running;
        for index in 0..self.concurrency {
            let context = self.context.clone();
            let spawned = thread::Builder::new()
                .name(format!("taskflow-worker-{}", index))
                .spawn(move || context.run());

            match spawned {
                Ok(handle) => {
                    lifecycle.live += 1;
                    lifecycle.handles.push(handle);
                }
                Err(e) => {
                    error!("Failed to spawn worker thread {}: {}", index, e);
                    lifecycle.state = if lifecycle.live == 0 {
                        WorkerState::Stopped
                    } else {
                        WorkerState::Stopping
                    };
                    drop(lifecycle);
                    self.context.queue.wake_all();
                    return Err(WorkerError::Spawn(e));
                }
            }
        }

        info!("Worker started with {} thread(s)", self.concurrency);
        Ok(())
    }

    /// Ask the loop threads to exit once their current task is recorded.
    ///
    /// With `wait`, blocks until every thread has exited; a task that was
    /// already dequeued is processed, recorded and saved first.
    pub fn stop(&self, wait: bool) -> Result<(), WorkerError> {
        {
            let mut lifecycle = self.context.lifecycle.inner.lock();
            match lifecycle.state {
                WorkerState::Stopped => return Err(WorkerError::NotRunning),
                WorkerState::Running => lifecycle.state = WorkerState::Stopping,
                WorkerState::Stopping => {}
            }
        }

        info!("Stopping worker");
        self.context.queue.wake_all();

        if wait {
            let handles = {
                let mut lifecycle = self.context.lifecycle.inner.lock();
                while lifecycle.live > 0 {
                    self.context.lifecycle.exited.wait(&mut lifecycle);
                }
                std::mem::take(&mut lifecycle.handles)
            };
            for handle in handles {
                if handle.join().is_err() {
                    warn!("Worker thread ended with a panic");
                }
            }
            info!("Worker stopped");
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.state() != WorkerState::Stopped {
            let _ = self.stop(true);
        }
    }
}

/// Decrements the live count when a loop thread ends, however it ends.
struct ExitGuard<'a> {
    lifecycle: &'a LifecycleCell,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.lifecycle.inner.lock();
        lifecycle.live = lifecycle.live.saturating_sub(1);
        if lifecycle.live == 0 {
            lifecycle.state = WorkerState::Stopped;
            self.lifecycle.exited.notify_all();
        }
    }
}

impl LoopContext {
    fn keep_running(&self) -> bool {
        self.lifecycle.inner.lock().state == WorkerState::Running
    }

    fn run(self) {
        let _guard = ExitGuard {
            lifecycle: &self.lifecycle,
        };
        debug!("Worker thread started");

        while self.keep_running() {
            match self.queue.dequeue(self.dequeue_timeout) {
                Some(task) => self.execute(task),
                None if self.queue.is_closed() => {
                    info!("Queue closed, worker thread exiting");
                    break;
                }
                None => {}
            }
        }

        debug!("Worker thread exiting");
    }

    fn execute(&self, task: TaskRecord) {
        let task_id = task.id;
        self.events.emit(&TaskEvent::Started {
            task_id,
            priority: task.priority,
        });

        let started = Instant::now();
        let outcome = run_processor(self.processor.as_ref(), &task.payload);
        let elapsed = started.elapsed();

        let recorded = match outcome {
            Ok(result) => self.queue.complete(task_id, result),
            Err(failure) => self.queue.fail(task_id, failure.message),
        };

        let record = match recorded {
            Ok(record) => record,
            Err(e) => {
                warn!(%task_id, "Could not record task outcome: {}", e);
                return;
            }
        };

        // The in-memory outcome stands even if the write fails; the store
        // reports the failure as a storage event.
        if let Err(e) = self.store.save(&record) {
            error!(%task_id, "Failed to persist task outcome: {}", e);
        }

        let event = match record.error_message {
            Some(error) => TaskEvent::Failed {
                task_id,
                elapsed,
                error,
            },
            None => TaskEvent::Completed { task_id, elapsed },
        };
        self.events.emit(&event);
    }
}
