//! Task — a unit of submitted work paired with a shareable completion handle

use crate::TaskError;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Task priority; higher values are claimed first
pub type Priority = u8;

/// Lowest priority
pub const MIN_PRIORITY: Priority = 0;
/// Priority used by [`crate::Pool::submit`]
pub const DEFAULT_PRIORITY: Priority = 127;
/// Highest priority
pub const MAX_PRIORITY: Priority = 255;

/// Unique identifier for a Task
///
/// Ids are allocated from a process-wide monotonic counter, so within one
/// priority class the smaller id is always the earlier submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate the next unique TaskId
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric id value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Outcome held by the shared completion cell
enum Completion {
    Pending,
    Resolved,
    Failed(TaskError),
}

/// Reference-counted completion state shared by a Task and all of its waiters
struct CompletionCell {
    state: Mutex<Completion>,
    ready: Condvar,
}

impl CompletionCell {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Completion::Pending),
            ready: Condvar::new(),
        })
    }

    /// Fulfil the cell exactly once; a second fulfilment is a broken invariant
    fn fulfil(&self, outcome: Result<(), TaskError>) {
        let mut state = self.state.lock();
        debug_assert!(
            matches!(*state, Completion::Pending),
            "completion cell fulfilled twice"
        );
        *state = match outcome {
            Ok(()) => Completion::Resolved,
            Err(e) => Completion::Failed(e),
        };
        self.ready.notify_all();
    }
}

/// Shareable, waitable handle onto a Task's eventual outcome
///
/// All clones observe the same completion event; completion happens-before
/// any waiter's observation of the outcome.
#[derive(Clone)]
pub struct TaskFuture {
    cell: Arc<CompletionCell>,
}

impl TaskFuture {
    /// Block until the task has run, returning its outcome
    pub fn wait(&self) -> Result<(), TaskError> {
        let mut state = self.cell.state.lock();
        loop {
            match &*state {
                Completion::Pending => self.cell.ready.wait(&mut state),
                Completion::Resolved => return Ok(()),
                Completion::Failed(e) => return Err(e.clone()),
            }
        }
    }

    /// Block until the task has run or the timeout elapses
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), TaskError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            match &*state {
                Completion::Pending => {
                    if self.cell.ready.wait_until(&mut state, deadline).timed_out() {
                        return match &*state {
                            Completion::Pending => None,
                            Completion::Resolved => Some(Ok(())),
                            Completion::Failed(e) => Some(Err(e.clone())),
                        };
                    }
                }
                Completion::Resolved => return Some(Ok(())),
                Completion::Failed(e) => return Some(Err(e.clone())),
            }
        }
    }

    /// Non-blocking poll of the outcome
    pub fn poll(&self) -> Option<Result<(), TaskError>> {
        match &*self.cell.state.lock() {
            Completion::Pending => None,
            Completion::Resolved => Some(Ok(())),
            Completion::Failed(e) => Some(Err(e.clone())),
        }
    }

    /// Whether the task has finished running
    pub fn is_complete(&self) -> bool {
        self.poll().is_some()
    }
}

/// A unit of work: a callable plus the completion cell its waiters share
///
/// `run` consumes the task, so a Task executes at most once by construction.
pub struct Task {
    id: TaskId,
    priority: Priority,
    callable: Box<dyn FnOnce() + Send + 'static>,
    cell: Arc<CompletionCell>,
}

impl Task {
    /// Create a task with the default priority
    pub fn new(callable: impl FnOnce() + Send + 'static) -> Self {
        Self::with_priority(callable, DEFAULT_PRIORITY)
    }

    /// Create a task with an explicit priority
    pub fn with_priority(callable: impl FnOnce() + Send + 'static, priority: Priority) -> Self {
        Self {
            id: TaskId::next(),
            priority,
            callable: Box::new(callable),
            cell: CompletionCell::new(),
        }
    }

    /// Get the task's unique id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task's priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Get a completion handle; may be called any number of times
    pub fn future(&self) -> TaskFuture {
        TaskFuture {
            cell: self.cell.clone(),
        }
    }

    /// Execute the callable synchronously on the calling thread
    ///
    /// The completion cell is fulfilled exactly once whether the callable
    /// returns or panics; a panic is caught and stored as
    /// [`TaskError::Panicked`] so no handle is left unresolved. The outcome is
    /// also returned to the caller.
    pub fn run(self) -> Result<(), TaskError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(self.callable))
            .map_err(|payload| TaskError::Panicked(panic_message(&*payload)));
        self.cell.fulfil(outcome.clone());
        outcome
    }
}

/// Best-effort extraction of a panic payload's message
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
