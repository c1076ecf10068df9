//! Beehive — embeddable worker-pool engine
//!
//! A fixed set of OS threads that accept arbitrary units of work, execute them
//! asynchronously, expose completion via a waitable handle, and report
//! per-thread runtime statistics. The engine provides:
//! - Task submission with priorities and a shareable completion handle
//! - A blocking, FIFO signaling mailbox per worker
//! - Lock-free per-worker statistics (message/run counts, active/idle time)
//! - Per-worker CPU affinity control
//! - Orderly, deadlock-free shutdown
//!
//! ```no_run
//! use beehive::Pool;
//!
//! let mut pool = Pool::new();
//! let future = pool.submit(|| println!("hello from a worker"));
//! future.wait().unwrap();
//! pool.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod platform;
pub mod pool;
pub mod signal;
pub mod stats;
pub mod task;
pub mod worker;

pub use platform::CpuSet;
pub use pool::Pool;
pub use signal::{Handler, HandlerResult, Message, SignalingQueue};
pub use stats::{AtomicStats, Stats, TimeCounter};
pub use task::{Priority, Task, TaskFuture, TaskId, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use worker::{DumpSink, Worker, WorkerView};

use std::io;

/// Failure of a submitted callable, observed by every holder of its
/// completion handle
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    /// The callable panicked; the payload's message is preserved
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Errors from the platform affinity collaborator
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The affinity syscall failed
    #[error("affinity call failed: {0}")]
    Affinity(#[source] io::Error),

    /// A CPU index in the mask exceeds what the platform can represent
    #[error("cpu index {0} out of range for this platform")]
    InvalidCpu(usize),

    /// The mask selects no CPUs at all
    #[error("affinity mask selects no cpus")]
    EmptyMask,

    /// The worker's thread has already been joined
    #[error("worker thread is no longer running")]
    WorkerStopped,

    /// Thread affinity is not available on this platform
    #[error("thread affinity is not supported on this platform")]
    Unsupported,
}
