use crate::{TaskId, TaskStatus};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Cannot {action} task {id} in status {from}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        action: String,
    },

    #[error("Queue is closed")]
    QueueClosed,
}

impl TaskError {
    pub(crate) fn transition(id: TaskId, from: TaskStatus, action: impl Into<String>) -> Self {
        TaskError::InvalidTransition {
            id,
            from,
            action: action.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
