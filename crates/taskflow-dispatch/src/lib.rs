pub mod queue;
pub mod recovery;

pub use queue::{PriorityDispatchQueue, QueueStats};
pub use recovery::{recover, RecoveryReport};
