//! Task Queue (component C8): an in-process priority queue mediating
//! access to the indexing pipeline, so at most `maxConcurrentTasks` run
//! at once regardless of how many watcher/CLI/RPC callers enqueue work.
//!
//! Grounded in the ordering and lifecycle contract of the teacher's
//! SQL-backed `summary_queue` (`pop_summary_queue` / `complete_summary_queue`
//! / `fail_summary_queue` / `recover_summary_queue` in `storage/sqlite.rs`),
//! translated to an in-memory `BinaryHeap` now that the relational layer
//! is gone.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 2;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub kind: String,
    pub payload: String,
    pub priority: i32,
    pub created_at: u64,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<u64>,
    pub cancel_requested: bool,
    pub error: Option<String>,
}

impl Task {
    fn new(id: u64, kind: String, payload: String, priority: i32) -> Self {
        Self {
            id,
            kind,
            payload,
            priority,
            created_at: now_millis(),
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            cancel_requested: false,
            error: None,
        }
    }
}

/// Orders tasks by ascending priority, then ascending `created_at` (FIFO
/// among equal priorities). `BinaryHeap` is a max-heap, so this `Ord`
/// impl is inverted: the "greatest" element is the one the queue should
/// pop first.
#[derive(Debug, Clone)]
struct QueuedTask {
    id: u64,
    priority: i32,
    created_at: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.created_at == other.created_at
    }
}
impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    Added { id: u64, kind: String },
    Started { id: u64 },
    Completed { id: u64 },
    Failed { id: u64, error: String },
    Retry { id: u64, retry_count: u32, next_retry_at: u64 },
    CancellationRequested { id: u64 },
    Cancelled { id: u64 },
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct Inner {
    tasks: std::collections::HashMap<u64, Task>,
    heap: BinaryHeap<QueuedTask>,
    active_count: usize,
}

/// A priority task queue with a bounded number of concurrently-active
/// tasks. Safe to share via `Arc` across the watcher, CLI/RPC handlers,
/// and the indexing pipeline's worker loop.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    max_concurrent: usize,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskQueue {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                tasks: std::collections::HashMap::new(),
                heap: BinaryHeap::new(),
                active_count: 0,
            }),
            next_id: AtomicU64::new(1),
            max_concurrent: max_concurrent_tasks.max(1),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    /// Enqueues a new task in `Pending` status and returns its id.
    pub fn enqueue(&self, kind: impl Into<String>, payload: impl Into<String>, priority: i32) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let kind = kind.into();
        let task = Task::new(id, kind.clone(), payload.into(), priority);
        let queued = QueuedTask {
            id,
            priority: task.priority,
            created_at: task.created_at,
        };
        let mut inner = self.inner.lock().expect("task queue poisoned");
        inner.tasks.insert(id, task);
        inner.heap.push(queued);
        drop(inner);
        self.emit(TaskEvent::Added { id, kind });
        id
    }

    /// Pops the next runnable task (pending, due, and under the
    /// concurrency cap), marking it `Active`. Returns `None` when the
    /// queue is empty, every pending task is concurrency-capped out, or
    /// the highest-priority pending task isn't due yet.
    pub fn pop_next(&self) -> Option<Task> {
        let mut inner = self.inner.lock().expect("task queue poisoned");
        if inner.active_count >= self.max_concurrent {
            return None;
        }
        let now = now_millis();

        // BinaryHeap doesn't support peeking past the top while skipping
        // not-yet-due entries in place, so drain into a side buffer and
        // restore whatever isn't taken.
        let mut deferred = Vec::new();
        let mut chosen = None;
        while let Some(candidate) = inner.heap.pop() {
            let due = inner
                .tasks
                .get(&candidate.id)
                .and_then(|t| t.next_retry_at)
                .map(|at| now >= at)
                .unwrap_or(true);
            if due {
                chosen = Some(candidate);
                break;
            }
            deferred.push(candidate);
        }
        for item in deferred {
            inner.heap.push(item);
        }

        let candidate = chosen?;
        let task = inner.tasks.get_mut(&candidate.id)?;
        if task.cancel_requested || task.status == TaskStatus::Cancelled {
            return None;
        }
        task.status = TaskStatus::Active;
        inner.active_count += 1;
        let result = task.clone();
        drop(inner);
        self.emit(TaskEvent::Started { id: result.id });
        Some(result)
    }

    pub fn complete(&self, id: u64) {
        let mut inner = self.inner.lock().expect("task queue poisoned");
        if let Some(task) = inner.tasks.get_mut(&id) {
            task.status = TaskStatus::Completed;
            inner.active_count = inner.active_count.saturating_sub(1);
        }
        drop(inner);
        self.emit(TaskEvent::Completed { id });
    }

    /// Fails a task. If it hasn't exhausted `max_retries`, reschedules it
    /// with exponential backoff (`nextRetryAt = now + retryDelay *
    /// 2^(retryCount-1)`) instead of terminating it.
    pub fn fail(&self, id: u64, error: impl Into<String>, retry_delay: Duration) {
        let error = error.into();
        let mut inner = self.inner.lock().expect("task queue poisoned");
        inner.active_count = inner.active_count.saturating_sub(1);

        let Some(task) = inner.tasks.get_mut(&id) else {
            return;
        };
        if task.cancel_requested {
            task.status = TaskStatus::Cancelled;
            drop(inner);
            self.emit(TaskEvent::Cancelled { id });
            return;
        }

        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            let delay_ms = retry_delay.as_millis() as u64 * 2u64.pow(task.retry_count - 1);
            let next_retry_at = now_millis() + delay_ms;
            task.next_retry_at = Some(next_retry_at);
            task.status = TaskStatus::Pending;
            let retry_count = task.retry_count;
            let priority = task.priority;
            let created_at = task.created_at;
            inner.heap.push(QueuedTask {
                id,
                priority,
                created_at,
            });
            drop(inner);
            self.emit(TaskEvent::Retry {
                id,
                retry_count,
                next_retry_at,
            });
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(error.clone());
            drop(inner);
            self.emit(TaskEvent::Failed { id, error });
        }
    }

    /// Cancels a task. A still-pending task is removed immediately; an
    /// active task is only flagged, so the worker holding it can observe
    /// `cancel_requested` and stop cooperatively.
    pub fn cancel(&self, id: u64) {
        let mut inner = self.inner.lock().expect("task queue poisoned");
        let Some(task) = inner.tasks.get_mut(&id) else {
            return;
        };
        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                drop(inner);
                self.emit(TaskEvent::Cancelled { id });
            }
            TaskStatus::Active => {
                task.cancel_requested = true;
                drop(inner);
                self.emit(TaskEvent::CancellationRequested { id });
            }
            _ => {}
        }
    }

    pub fn get(&self, id: u64) -> Option<Task> {
        self.inner.lock().expect("task queue poisoned").tasks.get(&id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().expect("task queue poisoned").heap.len()
    }

    pub fn active_len(&self) -> usize {
        self.inner.lock().expect("task queue poisoned").active_count
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_lower_priority_value_first() {
        let queue = TaskQueue::new(2);
        let low_priority_important = queue.enqueue("index", "a", 5);
        let high_priority_value = queue.enqueue("index", "b", 1);

        let first = queue.pop_next().unwrap();
        assert_eq!(first.id, high_priority_value);
        let second = queue.pop_next().unwrap();
        assert_eq!(second.id, low_priority_important);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let queue = TaskQueue::new(2);
        let first_in = queue.enqueue("index", "a", 1);
        let second_in = queue.enqueue("index", "b", 1);

        assert_eq!(queue.pop_next().unwrap().id, first_in);
        assert_eq!(queue.pop_next().unwrap().id, second_in);
    }

    #[test]
    fn respects_max_concurrent_tasks() {
        let queue = TaskQueue::new(1);
        queue.enqueue("index", "a", 1);
        queue.enqueue("index", "b", 1);

        assert!(queue.pop_next().is_some());
        assert!(queue.pop_next().is_none(), "second task should wait for a slot");
    }

    #[test]
    fn completing_a_task_frees_a_concurrency_slot() {
        let queue = TaskQueue::new(1);
        let first = queue.enqueue("index", "a", 1);
        queue.enqueue("index", "b", 1);

        let popped = queue.pop_next().unwrap();
        assert_eq!(popped.id, first);
        queue.complete(first);

        assert!(queue.pop_next().is_some());
    }

    #[test]
    fn failed_task_is_rescheduled_until_retries_exhausted() {
        let queue = TaskQueue::new(1);
        let id = queue.enqueue("index", "a", 1);
        queue.pop_next();
        queue.fail(id, "boom", Duration::from_millis(0));

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);

        // exhaust remaining retries
        for _ in 0..DEFAULT_MAX_RETRIES {
            queue.pop_next();
            queue.fail(id, "boom again", Duration::from_millis(0));
        }
        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn cancelling_a_pending_task_removes_it_immediately() {
        let queue = TaskQueue::new(2);
        let id = queue.enqueue("index", "a", 1);
        queue.cancel(id);
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Cancelled);
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn cancelling_an_active_task_only_flags_it() {
        let queue = TaskQueue::new(2);
        let id = queue.enqueue("index", "a", 1);
        queue.pop_next();
        queue.cancel(id);

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.cancel_requested);
    }

    #[test]
    fn events_are_published_for_lifecycle_transitions() {
        let queue = TaskQueue::new(2);
        let mut rx = queue.subscribe();
        let id = queue.enqueue("index", "a", 1);
        queue.pop_next();
        queue.complete(id);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], TaskEvent::Added { .. }));
        assert!(matches!(seen[1], TaskEvent::Started { .. }));
        assert!(matches!(seen[2], TaskEvent::Completed { .. }));
    }
}
