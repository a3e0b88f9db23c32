mod task;
mod priority;
mod error;
pub mod events;

pub use task::{TaskRecord, TaskId, TaskPayload, TaskStatus};
pub use priority::Priority;
pub use error::{TaskError, Result};
pub use events::{EventSink, EventFanout, LogSink, MemorySink, TaskEvent};

/// Longest accepted task name, in characters.
pub const MAX_NAME_LEN: usize = 100;
