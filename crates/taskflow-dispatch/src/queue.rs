use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskflow_core::{
    EventSink, LogSink, Priority, Result, TaskError, TaskEvent, TaskId, TaskPayload, TaskRecord,
    TaskStatus,
};
use tracing::debug;

/// Heap entry ordered by `(priority, sequence)`, smallest first
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    priority: Priority,
    sequence: u64,
    task_id: TaskId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the lowest priority number
        // and, within it, the earliest insertion comes out first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Heap and index live behind one lock so they can never diverge.
#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    index: HashMap<TaskId, TaskRecord>,
    next_sequence: u64,
    wake_generation: u64,
    closed: bool,
}

impl QueueState {
    fn push_pending(&mut self, record: TaskRecord) {
        let entry = QueueEntry {
            priority: record.priority,
            sequence: self.next_sequence,
            task_id: record.id,
        };
        self.next_sequence += 1;
        self.heap.push(entry);
        self.index.insert(record.id, record);
    }

    /// Pop the most urgent pending task and mark it processing
    fn pop_pending(&mut self) -> Option<TaskRecord> {
        while let Some(entry) = self.heap.pop() {
            let Some(record) = self.index.get_mut(&entry.task_id) else {
                continue;
            };
            if record.mark_processing().is_ok() {
                return Some(record.clone());
            }
        }
        None
    }

    fn remove_from_heap(&mut self, task_id: TaskId) {
        self.heap.retain(|entry| entry.task_id != task_id);
    }

    fn record_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord> {
        self.index
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))
    }
}

/// Counts over the id-index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending_count: usize,
    pub processing_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Entries waiting in the heap
    pub queue_size: usize,
}

/// Thread-safe min-priority queue keyed by task id.
///
/// Producers call [`enqueue`](Self::enqueue) from any thread; workers block in
/// [`dequeue`](Self::dequeue) on a condition variable until work arrives, the
/// timeout passes, or the queue is woken or closed. The id-index keeps every
/// task known to the queue, including finished ones, for O(1) status lookups.
pub struct PriorityDispatchQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    events: Arc<dyn EventSink>,
}

impl PriorityDispatchQueue {
    pub fn new() -> Self {
        Self::with_event_sink(Arc::new(LogSink))
    }

    pub fn with_event_sink(events: Arc<dyn EventSink>) -> Self {
        PriorityDispatchQueue {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            events,
        }
    }

    /// Validate and enqueue a new task. Returns its id.
    pub fn enqueue(
        &self,
        name: &str,
        priority: u8,
        payload: TaskPayload,
        max_retries: u32,
    ) -> Result<TaskId> {
        let priority = Priority::new(priority)?;
        let record = TaskRecord::new(name, priority, payload, max_retries)?;
        self.submit(record)
    }

    /// Enqueue a record built by the caller. It must be pending and unknown
    /// to the queue.
    pub fn submit(&self, record: TaskRecord) -> Result<TaskId> {
        if record.status != TaskStatus::Pending {
            return Err(TaskError::Validation(format!(
                "only pending tasks can be enqueued (task {} is {})",
                record.id, record.status
            )));
        }

        let task_id = record.id;
        let priority = record.priority;
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TaskError::QueueClosed);
            }
            if state.index.contains_key(&task_id) {
                return Err(TaskError::Validation(format!("task {} already exists", task_id)));
            }
            state.push_pending(record);
            self.available.notify_one();
        }

        self.events.emit(&TaskEvent::Enqueued { task_id, priority });
        Ok(task_id)
    }

    /// Load a record from durable storage into the index. Pending records also
    /// go into the heap; anything else is only indexed for lookups.
    pub fn reload(&self, record: TaskRecord) -> Result<()> {
        let mut state = self.state.lock();
        if state.index.contains_key(&record.id) {
            return Err(TaskError::Validation(format!("task {} already exists", record.id)));
        }

        if record.status == TaskStatus::Pending {
            state.push_pending(record);
            self.available.notify_one();
        } else {
            state.index.insert(record.id, record);
        }
        Ok(())
    }

    /// Take the most urgent pending task, waiting up to `timeout` for one.
    ///
    /// The returned copy is already marked `processing` in the index. Returns
    /// `None` on timeout, when the queue is closed, or after
    /// [`wake_all`](Self::wake_all).
    pub fn dequeue(&self, timeout: Duration) -> Option<TaskRecord> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let generation = state.wake_generation;

        loop {
            if let Some(record) = state.pop_pending() {
                debug!(task_id = %record.id, priority = %record.priority, "Dequeued task");
                return Some(record);
            }
            if state.closed || state.wake_generation != generation {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.pop_pending();
            }
        }
    }

    /// Current snapshot of a task
    pub fn get_status(&self, task_id: TaskId) -> Result<TaskRecord> {
        let state = self.state.lock();
        state
            .index
            .get(&task_id)
            .cloned()
            .ok_or(TaskError::NotFound(task_id))
    }

    /// Record the outcome of a task a worker is holding. Only a processing
    /// task may move, and only to `completed` or `failed`; claiming goes
    /// through `dequeue` so the heap and the index never disagree.
    pub fn update_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<TaskRecord> {
        self.apply(task_id, |record| {
            if record.status != TaskStatus::Processing || !status.is_terminal() {
                return Err(TaskError::InvalidTransition {
                    id: task_id,
                    from: record.status,
                    action: format!("move to {}", status),
                });
            }
            record.transition(status, error_message)
        })
    }

    /// Record a successful outcome together with the processor's result
    pub fn complete(&self, task_id: TaskId, result: Option<TaskPayload>) -> Result<TaskRecord> {
        self.apply(task_id, |record| record.complete(result))
    }

    /// Record a failed outcome
    pub fn fail(&self, task_id: TaskId, error: impl Into<String>) -> Result<TaskRecord> {
        let error = error.into();
        self.apply(task_id, |record| record.fail(error))
    }

    fn apply<F>(&self, task_id: TaskId, change: F) -> Result<TaskRecord>
    where
        F: FnOnce(&mut TaskRecord) -> Result<()>,
    {
        let mut state = self.state.lock();
        let record = state.record_mut(task_id)?;
        let was_pending = record.status == TaskStatus::Pending;

        change(record)?;
        let snapshot = record.clone();

        // Only pending tasks may sit in the heap.
        if was_pending && snapshot.status != TaskStatus::Pending {
            state.remove_from_heap(task_id);
        }
        Ok(snapshot)
    }

    /// Remove a pending task from both heap and index.
    pub fn cancel(&self, task_id: TaskId) -> Result<TaskRecord> {
        let mut state = self.state.lock();
        let status = state.record_mut(task_id)?.status;
        if status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                id: task_id,
                from: status,
                action: "cancel".to_string(),
            });
        }

        // O(n) heap rebuild; cancellation is rare next to enqueue/dequeue.
        state.remove_from_heap(task_id);
        state
            .index
            .remove(&task_id)
            .ok_or(TaskError::NotFound(task_id))
    }

    /// Put a failed task with retries left back into the heap.
    pub fn requeue(&self, task_id: TaskId) -> Result<TaskRecord> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TaskError::QueueClosed);
        }

        let record = state.record_mut(task_id)?;
        record.requeue()?;
        let snapshot = record.clone();

        state.push_pending(snapshot.clone());
        self.available.notify_one();
        Ok(snapshot)
    }

    /// Snapshot of every indexed task with `status`, oldest first
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let state = self.state.lock();
        let mut tasks: Vec<_> = state
            .index
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Number of tasks waiting in the heap
    pub fn size(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats {
            queue_size: state.heap.len(),
            ..Default::default()
        };

        for record in state.index.values() {
            match record.status {
                TaskStatus::Pending => stats.pending_count += 1,
                TaskStatus::Processing => stats.processing_count += 1,
                TaskStatus::Completed => stats.completed_count += 1,
                TaskStatus::Failed => stats.failed_count += 1,
            }
        }
        stats
    }

    /// Release every thread currently blocked in `dequeue` without closing
    /// the queue. Later calls to `dequeue` wait as usual.
    pub fn wake_all(&self) {
        let mut state = self.state.lock();
        state.wake_generation = state.wake_generation.wrapping_add(1);
        self.available.notify_all();
    }

    /// Stop accepting work and unblock all waiters permanently.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for PriorityDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::thread;
    use taskflow_core::MemorySink;

    const NO_WAIT: Duration = Duration::ZERO;

    fn enqueue(queue: &PriorityDispatchQueue, name: &str, priority: u8) -> TaskId {
        queue.enqueue(name, priority, json!({ "name": name }), 0).unwrap()
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let queue = PriorityDispatchQueue::new();

        let a = enqueue(&queue, "A", 3);
        let b = enqueue(&queue, "B", 1);
        let c = enqueue(&queue, "C", 1);

        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, b);
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, c);
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, a);
        assert!(queue.dequeue(NO_WAIT).is_none());
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let queue = PriorityDispatchQueue::new();

        for priority in [0, 6, 9] {
            let result = queue.enqueue("bad", priority, json!(null), 0);
            assert!(matches!(result, Err(TaskError::Validation(_))));
        }
        assert!(matches!(
            queue.enqueue("", 1, json!(null), 0),
            Err(TaskError::Validation(_))
        ));
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn test_status_visible_right_after_enqueue() {
        let queue = PriorityDispatchQueue::new();
        let id = enqueue(&queue, "send welcome email", 2);

        let record = queue.get_status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.priority.value(), 2);
    }

    #[test]
    fn test_dequeue_marks_processing() {
        let queue = PriorityDispatchQueue::new();
        let id = enqueue(&queue, "generate report", 1);

        let record = queue.dequeue(NO_WAIT).unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(queue.get_status(id).unwrap().status, TaskStatus::Processing);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_terminal_status_cannot_change() {
        let queue = PriorityDispatchQueue::new();
        let id = enqueue(&queue, "process payment", 1);
        queue.dequeue(NO_WAIT).unwrap();

        let done = queue.complete(id, Some(json!({"ok": true}))).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        for status in TaskStatus::ALL {
            let err = queue.update_status(id, status, None).unwrap_err();
            assert!(matches!(err, TaskError::InvalidTransition { .. }));
        }
        assert_eq!(queue.get_status(id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_update_status_rejects_unclaimed_task() {
        let queue = PriorityDispatchQueue::new();
        let id = enqueue(&queue, "update profile", 1);

        for status in TaskStatus::ALL {
            let err = queue.update_status(id, status, None).unwrap_err();
            assert!(matches!(
                err,
                TaskError::InvalidTransition { from: TaskStatus::Pending, .. }
            ));
        }

        // Still queued and still claimable.
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.get_status(id).unwrap().status, TaskStatus::Pending);
        let claimed = queue.dequeue(NO_WAIT).unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Processing);
    }

    #[test]
    fn test_update_status_records_outcome_of_claimed_task() {
        let queue = PriorityDispatchQueue::new();
        let id = enqueue(&queue, "update profile", 1);
        queue.dequeue(NO_WAIT).unwrap();

        let err = queue
            .update_status(id, TaskStatus::Processing, None)
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));

        let record = queue
            .update_status(id, TaskStatus::Failed, Some("rejected upstream".to_string()))
            .unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("rejected upstream"));
        assert_eq!(queue.get_status(id).unwrap(), record);
    }

    #[test]
    fn test_unknown_task() {
        let queue = PriorityDispatchQueue::new();
        let id = TaskId::new_v4();

        assert_eq!(queue.get_status(id), Err(TaskError::NotFound(id)));
        assert_eq!(
            queue.update_status(id, TaskStatus::Completed, None),
            Err(TaskError::NotFound(id))
        );
        assert_eq!(queue.cancel(id), Err(TaskError::NotFound(id)));
    }

    #[test]
    fn test_cancel_pending_only() {
        let queue = PriorityDispatchQueue::new();
        let keep = enqueue(&queue, "keep", 2);
        let dropped = enqueue(&queue, "drop", 1);

        let cancelled = queue.cancel(dropped).unwrap();
        assert_eq!(cancelled.id, dropped);
        assert_eq!(queue.size(), 1);
        assert!(matches!(queue.get_status(dropped), Err(TaskError::NotFound(_))));

        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, keep);
        assert!(matches!(
            queue.cancel(keep),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_requeue_failed_task() {
        let queue = PriorityDispatchQueue::new();
        let id = queue.enqueue("flaky", 2, json!(null), 1).unwrap();
        let later = enqueue(&queue, "later", 2);

        queue.dequeue(NO_WAIT).unwrap();
        queue.fail(id, "timeout").unwrap();

        let requeued = queue.requeue(id).unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert_eq!(requeued.retry_count, 1);

        // Requeued work goes behind tasks already waiting at the same priority.
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, later);
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, id);

        queue.fail(id, "timeout again").unwrap();
        assert!(matches!(
            queue.requeue(id),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_stats_and_listing() {
        let queue = PriorityDispatchQueue::new();
        let first = enqueue(&queue, "first", 1);
        let second = enqueue(&queue, "second", 1);
        enqueue(&queue, "third", 5);

        queue.dequeue(NO_WAIT).unwrap();
        queue.dequeue(NO_WAIT).unwrap();
        queue.complete(first, None).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.processing_count, 1);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.failed_count, 0);
        assert_eq!(stats.queue_size, 1);

        let processing = queue.tasks_by_status(TaskStatus::Processing);
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, second);
    }

    #[test]
    fn test_dequeue_times_out() {
        let queue = PriorityDispatchQueue::new();
        let started = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(100)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_enqueue_wakes_blocked_dequeue() {
        let queue = Arc::new(PriorityDispatchQueue::new());

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        let id = enqueue(&queue, "wake up", 3);

        let record = waiter.join().unwrap().unwrap();
        assert_eq!(record.id, id);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_close_unblocks_waiters() {
        let queue = Arc::new(PriorityDispatchQueue::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.dequeue(Duration::from_secs(30)))
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        queue.close();

        for waiter in waiters {
            assert!(waiter.join().unwrap().is_none());
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            queue.enqueue("late", 1, json!(null), 0),
            Err(TaskError::QueueClosed)
        );
    }

    #[test]
    fn test_wake_all_does_not_close() {
        let queue = Arc::new(PriorityDispatchQueue::new());

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(100));
        queue.wake_all();
        assert!(waiter.join().unwrap().is_none());

        assert!(!queue.is_closed());
        let id = enqueue(&queue, "after wake", 1);
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, id);
    }

    #[test]
    fn test_reload_indexes_without_heaping_finished_work() {
        let queue = PriorityDispatchQueue::new();

        let pending = TaskRecord::new("pending", Priority::normal(), json!(null), 0).unwrap();
        let mut done = TaskRecord::new("done", Priority::highest(), json!(null), 0).unwrap();
        done.mark_processing().unwrap();
        done.complete(None).unwrap();

        queue.reload(done.clone()).unwrap();
        queue.reload(pending.clone()).unwrap();
        assert!(queue.reload(pending.clone()).is_err());

        assert_eq!(queue.size(), 1);
        assert_eq!(queue.get_status(done.id).unwrap(), done);
        assert_eq!(queue.dequeue(NO_WAIT).unwrap().id, pending.id);
    }

    #[test]
    fn test_enqueue_emits_event() {
        let events = Arc::new(MemorySink::new());
        let queue = PriorityDispatchQueue::with_event_sink(events.clone());

        let id = enqueue(&queue, "observed", 4);
        assert_eq!(events.names_for(id), vec!["task_enqueued"]);
    }

    #[test]
    fn test_concurrent_producers() {
        const PRODUCERS: usize = 50;
        const PER_PRODUCER: usize = 50;

        let queue = Arc::new(PriorityDispatchQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    (0..PER_PRODUCER)
                        .map(|i| {
                            let priority = ((producer + i) % 5) as u8 + 1;
                            queue
                                .enqueue(&format!("p{}-{}", producer, i), priority, json!(i), 0)
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }

        assert_eq!(ids.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(queue.size(), PRODUCERS * PER_PRODUCER);
        assert_eq!(queue.stats().pending_count, PRODUCERS * PER_PRODUCER);
        for id in &ids {
            assert_eq!(queue.get_status(*id).unwrap().status, TaskStatus::Pending);
        }
    }

    #[test]
    fn test_concurrent_consumers_take_each_task_once() {
        let queue = Arc::new(PriorityDispatchQueue::new());
        let expected: HashSet<_> = (0..500)
            .map(|i| enqueue(&queue, &format!("t{}", i), (i % 5) as u8 + 1))
            .collect();

        let consumers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(record) = queue.dequeue(Duration::from_millis(50)) {
                        taken.push(record.id);
                    }
                    taken
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for consumer in consumers {
            for id in consumer.join().unwrap() {
                assert!(seen.insert(id), "task {} dequeued twice", id);
            }
        }
        assert_eq!(seen, expected);
    }

    proptest! {
        #[test]
        fn prop_dequeue_order_is_priority_then_arrival(priorities in prop::collection::vec(1u8..=5, 1..60)) {
            let queue = PriorityDispatchQueue::new();
            let ids: Vec<_> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| queue.enqueue(&format!("t{}", i), *p, json!(i), 0).unwrap())
                .collect();

            let mut expected: Vec<_> = (0..ids.len()).collect();
            expected.sort_by_key(|&i| (priorities[i], i));

            let mut order = Vec::new();
            while let Some(record) = queue.dequeue(NO_WAIT) {
                order.push(record.id);
            }
            let expected_ids: Vec<_> = expected.into_iter().map(|i| ids[i]).collect();
            prop_assert_eq!(order, expected_ids);
        }
    }
}
