use taskflow_core::TaskError;
use taskflow_persistence::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker is already running")]
    AlreadyRunning,

    #[error("Worker is not running")]
    NotRunning,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TaskFlowError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Coarse classification for front ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl TaskFlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskFlowError::Task(TaskError::NotFound(_))
            | TaskFlowError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            TaskFlowError::Task(TaskError::Validation(_)) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }

    /// Message safe to show to a remote caller: no storage paths or I/O detail
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::BadRequest => self.to_string(),
            ErrorKind::Internal => "internal error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskFlowError>;
