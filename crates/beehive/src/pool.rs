//! Pool — the submission and dispatch authority
//!
//! Owns the set of workers and the shared pending-task queue. Submissions are
//! enqueued by priority (FIFO within a priority class) and one worker is woken
//! per submission; the woken worker claims work through [`TaskQueue`], the
//! only shared structure mutated on the hot path.

use crate::stats::Stats;
use crate::task::{Priority, Task, TaskFuture, DEFAULT_PRIORITY};
use crate::worker::{Worker, WorkerView};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Heap entry ordering: higher priority first, earlier submission first
/// within a priority class (task ids are allocated monotonically)
struct QueuedTask(Task);

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.id().cmp(&self.0.id()))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Eq for QueuedTask {}

/// Shared pending-task queue, claimed from by workers
///
/// A single mutex-protected priority heap. `pop` atomically removes the
/// highest-priority task, which is what makes claiming exactly-once even with
/// many workers waking concurrently.
pub(crate) struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.heap.lock().push(QueuedTask(task));
    }

    /// Claim the highest-priority pending task, if any
    pub(crate) fn pop(&self) -> Option<Task> {
        self.heap.lock().pop().map(|queued| queued.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

/// Owner of all workers and the shared pending-task queue
pub struct Pool {
    pending: Arc<TaskQueue>,
    workers: Vec<Worker>,
    /// Round-robin wake-up cursor
    next_worker: AtomicUsize,
}

impl Pool {
    /// Create a pool with one worker per logical CPU
    pub fn new() -> Self {
        Self::with_workers(0)
    }

    /// Create a pool with the given number of workers
    ///
    /// A count of zero falls back to the number of logical CPUs. Workers
    /// start their loop threads immediately.
    pub fn with_workers(count: usize) -> Self {
        let count = if count == 0 { num_cpus::get() } else { count };

        let pending = Arc::new(TaskQueue::new());
        let workers = (0..count)
            .map(|id| Worker::spawn(id, Arc::downgrade(&pending)))
            .collect();

        Self {
            pending,
            workers,
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Submit a callable with the default priority
    pub fn submit(&self, callable: impl FnOnce() + Send + 'static) -> TaskFuture {
        self.submit_with_priority(callable, DEFAULT_PRIORITY)
    }

    /// Submit a callable with an explicit priority
    ///
    /// The task is enqueued and exactly one worker is woken, chosen
    /// round-robin. Higher priorities are claimed first; within a priority
    /// class, first submitted is first claimed. After [`Pool::shutdown`] a
    /// submission still enqueues but is never claimed.
    pub fn submit_with_priority(
        &self,
        callable: impl FnOnce() + Send + 'static,
        priority: Priority,
    ) -> TaskFuture {
        let task = Task::with_priority(callable, priority);
        let future = task.future();
        self.pending.push(task);
        self.wake_one();
        future
    }

    /// Send one `TaskAvailable` wake-up, round-robin across workers
    fn wake_one(&self) {
        let idx = self.next_worker.fetch_add(1, AtomicOrdering::Relaxed) % self.workers.len();
        self.workers[idx].request_task();
    }

    /// Ask every worker to emit its diagnostic report
    pub fn dump_all(&self) {
        for worker in &self.workers {
            worker.dump();
        }
    }

    /// Signal `Exit` to every worker and join all loop threads; idempotent
    ///
    /// Workers process no further messages after their `Exit`; tasks still
    /// pending at that point remain queued and are never run.
    pub fn shutdown(&mut self) {
        // Broadcast first so all workers wind down in parallel, then join
        for worker in &self.workers {
            worker.exit();
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }

    /// Number of workers in the pool
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Access one worker by id
    pub fn worker(&self, id: usize) -> Option<&Worker> {
        self.workers.get(id)
    }

    /// Read-only views over all workers
    pub fn views(&self) -> impl Iterator<Item = WorkerView<'_>> {
        self.workers.iter().map(Worker::view)
    }

    /// Pool-wide statistics: the sum of every worker's snapshot
    pub fn stats(&self) -> Stats {
        self.workers.iter().map(Worker::stats).sum()
    }

    /// Number of tasks currently pending in the shared queue
    pub fn pending_tasks(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
