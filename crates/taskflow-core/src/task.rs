use crate::{Priority, Result, TaskError, MAX_NAME_LEN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Opaque data handed to the processor
pub type TaskPayload = serde_json::Value;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Handed to a worker
    Processing,
    /// Processor returned success
    Completed,
    /// Processor returned or raised a failure
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether moving to `next` is the single forward step from here:
    /// pending to processing, or processing to an outcome.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(TaskError::Validation(format!("unknown task status: {}", other))),
        }
    }
}

/// A named, prioritized unit of work and its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier
    pub id: TaskId,

    /// Descriptive label
    pub name: String,

    /// Priority (1-5, 1 = most urgent)
    pub priority: Priority,

    /// Current status
    pub status: TaskStatus,

    /// Data passed to the processor
    pub payload: TaskPayload,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Refreshed on every status transition
    pub updated_at: DateTime<Utc>,

    /// When the task last joined the queue: creation, or its latest retry.
    /// Recovery replays pending work in this order.
    pub queued_at: DateTime<Utc>,

    /// Failure detail (only while failed)
    #[serde(default)]
    pub error_message: Option<String>,

    /// Success value returned by the processor (only while completed)
    #[serde(default)]
    pub result: Option<TaskPayload>,

    /// Number of times the task has been re-enqueued after failing
    #[serde(default)]
    pub retry_count: u32,

    /// Maximum number of re-enqueues allowed
    pub max_retries: u32,
}

impl TaskRecord {
    /// Create a new pending task
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        payload: TaskPayload,
        max_retries: u32,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name).map_err(TaskError::Validation)?;

        let now = Utc::now();
        Ok(TaskRecord {
            id: Uuid::new_v4(),
            name,
            priority,
            status: TaskStatus::Pending,
            payload,
            created_at: now,
            updated_at: now,
            queued_at: now,
            error_message: None,
            result: None,
            retry_count: 0,
            max_retries,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if task can be re-enqueued after a failure
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Move the task forward to `next`.
    ///
    /// `error_message` is only recorded when `next` is `Failed`.
    pub fn transition(&mut self, next: TaskStatus, error_message: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::transition(
                self.id,
                self.status,
                format!("move to {}", next),
            ));
        }

        self.status = next;
        self.error_message = match next {
            TaskStatus::Failed => {
                Some(error_message.unwrap_or_else(|| "task failed".to_string()))
            }
            _ => None,
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark task as claimed by a worker
    pub fn mark_processing(&mut self) -> Result<()> {
        self.transition(TaskStatus::Processing, None)
    }

    /// Mark task as completed successfully.
    /// A `null` result is stored as no result.
    pub fn complete(&mut self, result: Option<TaskPayload>) -> Result<()> {
        self.transition(TaskStatus::Completed, None)?;
        self.result = result.filter(|value| !value.is_null());
        Ok(())
    }

    /// Mark task as failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed, Some(error.into()))
    }

    /// Put a failed task back to pending, consuming one retry.
    pub fn requeue(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(TaskError::transition(self.id, self.status, "retry"));
        }
        if !self.can_retry() {
            return Err(TaskError::transition(
                self.id,
                self.status,
                format!("retry (retries exhausted: {}/{})", self.retry_count, self.max_retries),
            ));
        }

        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.error_message = None;
        self.result = None;
        self.updated_at = Utc::now();
        self.queued_at = self.updated_at;
        Ok(())
    }

    /// Release a task whose worker went away back to pending.
    /// Only used when recovering records left in `processing`.
    pub fn release(&mut self) -> Result<()> {
        if self.status != TaskStatus::Processing {
            return Err(TaskError::transition(self.id, self.status, "release"));
        }
        self.status = TaskStatus::Pending;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check the record against the schema rules enforced on every load.
    pub fn validate(&self) -> std::result::Result<(), String> {
        validate_name(&self.name)?;

        if self.error_message.is_some() && self.status != TaskStatus::Failed {
            return Err(format!("error_message set on a {} task", self.status));
        }
        if self.result.is_some() && self.status != TaskStatus::Completed {
            return Err(format!("result set on a {} task", self.status));
        }
        if self.retry_count > self.max_retries {
            return Err(format!(
                "retry_count {} exceeds max_retries {}",
                self.retry_count, self.max_retries
            ));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err("task name must not be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("task name exceeds {} characters", MAX_NAME_LEN));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::new("send welcome email", Priority::normal(), json!({"user": 1}), 2).unwrap()
    }

    #[test]
    fn test_task_creation() {
        let task = record();
        assert_eq!(task.name, "send welcome email");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = TaskRecord::new("  ", Priority::normal(), json!(null), 0);
        assert!(matches!(result, Err(TaskError::Validation(_))));

        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(TaskRecord::new(long, Priority::normal(), json!(null), 0).is_err());
    }

    #[test]
    fn test_forward_transitions() {
        let mut task = record();
        task.mark_processing().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);

        task.complete(Some(json!("done"))).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!("done")));
        assert!(task.updated_at >= task.created_at);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut task = record();
        task.mark_processing().unwrap();
        task.fail("boom").unwrap();
        assert_eq!(task.error_message.as_deref(), Some("boom"));

        for next in TaskStatus::ALL {
            let err = task.transition(next, None).unwrap_err();
            assert!(matches!(err, TaskError::InvalidTransition { .. }));
        }
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_pending_cannot_skip_processing() {
        let mut task = record();
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(task.complete(None).is_err());
        assert!(task.fail("never ran").is_err());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_no_regression() {
        let mut task = record();
        task.mark_processing().unwrap();
        assert!(task.transition(TaskStatus::Pending, None).is_err());
        assert!(task.transition(TaskStatus::Processing, None).is_err());
    }

    #[test]
    fn test_requeue_consumes_retry_budget() {
        let mut task = record();
        for attempt in 1..=2 {
            task.mark_processing().unwrap();
            task.fail("flaky").unwrap();
            task.requeue().unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.retry_count, attempt);
            assert!(task.error_message.is_none());
            assert_eq!(task.queued_at, task.updated_at);
        }

        task.mark_processing().unwrap();
        task.fail("flaky").unwrap();
        assert!(!task.can_retry());
        assert!(task.requeue().is_err());
    }

    #[test]
    fn test_requeue_requires_failed() {
        let mut task = record();
        assert!(task.requeue().is_err());
        task.mark_processing().unwrap();
        task.complete(None).unwrap();
        assert!(task.requeue().is_err());
    }

    #[test]
    fn test_release_processing() {
        let mut task = record();
        assert!(task.release().is_err());
        task.mark_processing().unwrap();
        task.release().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        // A released task keeps its place in line.
        assert_eq!(task.queued_at, task.created_at);
    }

    #[test]
    fn test_validate_rejects_inconsistent_records() {
        let mut task = record();
        task.error_message = Some("stray".to_string());
        assert!(task.validate().is_err());

        let mut task = record();
        task.retry_count = 5;
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_status_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("in_progress".parse::<TaskStatus>().is_err());
    }
}
