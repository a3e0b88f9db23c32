pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod worker;

pub use config::{LogFormat, TaskFlowConfig, WorkerConfig};
pub use engine::TaskFlow;
pub use error::{ErrorKind, TaskFlowError, WorkerError};
pub use metrics::TaskMetrics;
pub use processor::{
    run_processor, EchoProcessor, ProcessResult, ProcessorFailure, SimulatedProcessor,
    SleepProcessor, TaskProcessor,
};
pub use worker::{Worker, WorkerState};
