use crate::PriorityDispatchQueue;
use serde::Serialize;
use taskflow_core::TaskStatus;
use taskflow_persistence::{DurableStore, StoreError};
use tracing::{info, warn};

/// Outcome of rebuilding a queue from durable storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Records placed back into the heap as pending
    pub restored: usize,
    /// Of those, records found `processing` whose worker went away
    pub released: usize,
    /// Completed or failed records indexed for lookups only
    pub terminal: usize,
}

/// Load every readable record from `store` into `queue`.
///
/// Pending records are enqueued in the order they last joined a queue
/// (`queued_at`), so a retried task stays behind work that was waiting when it
/// was retried, just as it did before the restart. A record left in
/// `processing` had its worker die mid-task: it is released back to pending
/// and written back so the next start sees the same state. Corrupt files are
/// skipped by the store itself. Running this twice on the same data leaves the
/// store unchanged.
pub fn recover(
    store: &DurableStore,
    queue: &PriorityDispatchQueue,
) -> Result<RecoveryReport, StoreError> {
    let mut report = RecoveryReport::default();

    let mut records = store.list_all()?;
    records.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));

    for mut record in records {
        if record.status == TaskStatus::Processing {
            if let Err(e) = record.release() {
                warn!(task_id = %record.id, "Cannot release task: {}", e);
                continue;
            }
            if let Err(e) = store.save(&record) {
                warn!(task_id = %record.id, "Released task not written back: {}", e);
            }
            report.released += 1;
        }

        let terminal = record.is_terminal();
        let task_id = record.id;
        if let Err(e) = queue.reload(record) {
            warn!(%task_id, "Skipping recovered task: {}", e);
            continue;
        }

        if terminal {
            report.terminal += 1;
        } else {
            report.restored += 1;
        }
    }

    info!(
        restored = report.restored,
        released = report.released,
        terminal = report.terminal,
        "Recovered queue from storage"
    );
    Ok(report)
}
