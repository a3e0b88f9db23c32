use rand::Rng;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use taskflow_core::TaskPayload;

/// Failure reported by a processor. Always turned into a `failed` task,
/// never propagated out of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorFailure {
    pub message: String,
}

impl ProcessorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        ProcessorFailure {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProcessorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<String> for ProcessorFailure {
    fn from(message: String) -> Self {
        ProcessorFailure { message }
    }
}

impl From<&str> for ProcessorFailure {
    fn from(message: &str) -> Self {
        ProcessorFailure::new(message)
    }
}

/// Outcome of one processor call: an optional result value or a failure
pub type ProcessResult = Result<Option<TaskPayload>, ProcessorFailure>;

/// The work a [`Worker`](crate::Worker) performs for each task.
///
/// Called from worker threads without any queue lock held.
pub trait TaskProcessor: Send + Sync {
    fn process(&self, payload: &TaskPayload) -> ProcessResult;
}

impl<F> TaskProcessor for F
where
    F: Fn(&TaskPayload) -> ProcessResult + Send + Sync,
{
    fn process(&self, payload: &TaskPayload) -> ProcessResult {
        self(payload)
    }
}

/// Returns the payload as the result
pub struct EchoProcessor;

impl TaskProcessor for EchoProcessor {
    fn process(&self, payload: &TaskPayload) -> ProcessResult {
        Ok(Some(payload.clone()))
    }
}

/// Simulates work by sleeping
pub struct SleepProcessor {
    duration: Duration,
}

impl SleepProcessor {
    pub fn new(duration_ms: u64) -> Self {
        SleepProcessor {
            duration: Duration::from_millis(duration_ms),
        }
    }
}

impl TaskProcessor for SleepProcessor {
    fn process(&self, _payload: &TaskPayload) -> ProcessResult {
        std::thread::sleep(self.duration);
        Ok(None)
    }
}

/// Demo processor: sleeps for a random short time and fails a fraction of
/// tasks at random.
pub struct SimulatedProcessor {
    min_ms: u64,
    max_ms: u64,
    failure_rate: f64,
}

impl SimulatedProcessor {
    pub fn new(min_ms: u64, max_ms: u64, failure_rate: f64) -> Self {
        SimulatedProcessor {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        SimulatedProcessor::new(100, 500, 0.1)
    }
}

impl TaskProcessor for SimulatedProcessor {
    fn process(&self, payload: &TaskPayload) -> ProcessResult {
        let (sleep_ms, fails) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(self.min_ms..=self.max_ms),
                rng.gen_bool(self.failure_rate),
            )
        };
        std::thread::sleep(Duration::from_millis(sleep_ms));

        if fails {
            return Err(ProcessorFailure::new("simulated processing failure"));
        }
        Ok(Some(json!({
            "processed_ms": sleep_ms,
            "input": payload,
        })))
    }
}

/// Invoke `processor`, turning a panic into a [`ProcessorFailure`].
pub fn run_processor(processor: &dyn TaskProcessor, payload: &TaskPayload) -> ProcessResult {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(payload))) {
        Ok(outcome) => outcome,
        Err(panic) => Err(ProcessorFailure::new(format!(
            "processor panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
