use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use taskflow_core::{EventSink, TaskEvent};

/// Prometheus metrics fed from task events
pub struct TaskMetrics {
    pub registry: Registry,

    // Task counters by event name
    pub tasks_total: IntCounterVec,

    pub storage_errors_total: IntCounter,

    // Processor run time of finished tasks
    pub task_duration: Histogram,
}

impl TaskMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("taskflow_tasks_total", "Task lifecycle events by kind"),
            &["event"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let storage_errors_total = IntCounter::new(
            "taskflow_storage_errors_total",
            "Failed durable reads and writes",
        )?;
        registry.register(Box::new(storage_errors_total.clone()))?;

        let task_duration = Histogram::with_opts(HistogramOpts::new(
            "taskflow_task_duration_seconds",
            "Processor run time in seconds",
        ))?;
        registry.register(Box::new(task_duration.clone()))?;

        Ok(TaskMetrics {
            registry,
            tasks_total,
            storage_errors_total,
            task_duration,
        })
    }

    /// Count of events seen with the given name
    pub fn event_count(&self, event: &str) -> u64 {
        self.tasks_total.with_label_values(&[event]).get()
    }

    /// Text exposition format of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl EventSink for TaskMetrics {
    fn emit(&self, event: &TaskEvent) {
        match event {
            TaskEvent::StorageError { .. } => self.storage_errors_total.inc(),
            TaskEvent::Completed { elapsed, .. } | TaskEvent::Failed { elapsed, .. } => {
                self.task_duration.observe(elapsed.as_secs_f64());
                self.tasks_total.with_label_values(&[event.name()]).inc();
            }
            TaskEvent::Enqueued { .. } | TaskEvent::Started { .. } => {
                self.tasks_total.with_label_values(&[event.name()]).inc();
            }
        }
    }
}
