//! Lock-free per-worker statistics
//!
//! Each field is an independent atomic accumulator: the owning worker thread
//! writes, any thread reads, and reading never blocks the worker's hot path.
//! A [`Stats`] snapshot is per-field consistent but not atomic across fields.

use std::iter::Sum;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Accumulator of completed timed intervals
///
/// `start`/`stop` are called only by the owning thread; `value` may be called
/// concurrently from any thread. While an interval is open, `value` returns
/// only the completed intervals — the open interval's partial time is not
/// included. This is a documented approximation, not a bug.
pub struct TimeCounter {
    /// Reference point for the open-interval encoding
    base: Instant,
    /// Total nanoseconds of completed intervals
    accumulated: AtomicU64,
    /// Start of the open interval as nanos-since-base plus one; zero = closed
    open_since: AtomicU64,
}

impl TimeCounter {
    /// Create a counter with no accumulated time
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            accumulated: AtomicU64::new(0),
            open_since: AtomicU64::new(0),
        }
    }

    /// Mark the beginning of a timed interval; owning thread only
    pub fn start(&self) {
        let now = self.base.elapsed().as_nanos() as u64;
        let prev = self.open_since.swap(now + 1, Ordering::Relaxed);
        debug_assert_eq!(prev, 0, "interval started twice");
    }

    /// Mark the end of the open interval; owning thread only
    pub fn stop(&self) {
        let now = self.base.elapsed().as_nanos() as u64;
        let open = self.open_since.swap(0, Ordering::Relaxed);
        debug_assert_ne!(open, 0, "interval stopped without start");
        if open != 0 {
            self.accumulated
                .fetch_add(now.saturating_sub(open - 1), Ordering::Relaxed);
        }
    }

    /// Accumulated duration of completed intervals; never goes backward
    pub fn value(&self) -> Duration {
        Duration::from_nanos(self.accumulated.load(Ordering::Relaxed))
    }
}

impl Default for TimeCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker accumulators, written by the worker thread and read anywhere
pub struct AtomicStats {
    messages: AtomicU64,
    runs: AtomicU64,
    active: TimeCounter,
    idle: TimeCounter,
}

impl AtomicStats {
    /// Create zeroed accumulators
    pub fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            active: TimeCounter::new(),
            idle: TimeCounter::new(),
        }
    }

    /// Count one processed message
    pub fn message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one executed task
    pub fn run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Time spent inside message handlers
    pub fn active(&self) -> &TimeCounter {
        &self.active
    }

    /// Time spent waiting for messages
    pub fn idle(&self) -> &TimeCounter {
        &self.idle
    }

    /// Snapshot all four fields
    ///
    /// The snapshot is not atomic across fields, but each field individually
    /// never goes backward between snapshots.
    pub fn load(&self) -> Stats {
        Stats {
            messages: self.messages.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
            active: self.active.value(),
            idle: self.idle.value(),
        }
    }
}

impl Default for AtomicStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable statistics snapshot for one worker, summable across the pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    /// Messages processed by the dispatch loop
    pub messages: u64,
    /// Tasks claimed and run
    pub runs: u64,
    /// Cumulative time spent inside message handlers
    pub active: Duration,
    /// Cumulative time spent waiting for messages
    pub idle: Duration,
}

impl Add for Stats {
    type Output = Stats;

    fn add(self, rhs: Stats) -> Stats {
        Stats {
            messages: self.messages + rhs.messages,
            runs: self.runs + rhs.runs,
            active: self.active + rhs.active,
            idle: self.idle + rhs.idle,
        }
    }
}

impl Sum for Stats {
    fn sum<I: Iterator<Item = Stats>>(iter: I) -> Stats {
        iter.fold(Stats::default(), Add::add)
    }
}
