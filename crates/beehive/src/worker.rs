//! Worker — one dedicated thread plus its mailbox, stats, and identity
//!
//! A worker runs the signaling queue's dispatch loop until it processes
//! `Exit`. It blocks only while waiting for a message; handlers and task
//! callables run to completion on the worker thread.

use crate::platform::{self, CpuSet};
use crate::pool::TaskQueue;
use crate::signal::{Handler, HandlerResult, Message, SignalingQueue};
use crate::stats::{AtomicStats, Stats};
use crate::{PlatformError, TaskError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

/// Destination for diagnostic dump reports
pub type DumpSink = Box<dyn Write + Send>;

/// Process-wide output-serialization lock for dump reports
///
/// Exists for the process duration, acquired only around dump formatting;
/// never held while executing task callables.
static DUMP_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Write one worker's diagnostic report as a contiguous block
fn write_report(out: &mut dyn Write, name: &str, stats: &Stats) -> io::Result<()> {
    writeln!(out, "Thread: {}", name)?;
    writeln!(out, "Number of tasks ran: {}", stats.runs)?;
    writeln!(out, "Number of messages processed: {}", stats.messages)?;
    writeln!(out, "Time active: {} milliseconds", stats.active.as_millis())?;
    writeln!(out, "Time idle: {} milliseconds", stats.idle.as_millis())?;
    Ok(())
}

/// Handler state living on the worker thread
struct WorkLoop {
    /// Non-owning reference to the pool's pending-task queue
    pending: Weak<TaskQueue>,
    stats: Arc<AtomicStats>,
    name: Arc<Mutex<String>>,
    sink: Arc<Mutex<DumpSink>>,
}

impl Handler for WorkLoop {
    fn on_before_message(&mut self) {
        self.stats.idle().stop();
        self.stats.active().start();
        self.stats.message();
    }

    fn on_after_message(&mut self) {
        self.stats.active().stop();
        self.stats.idle().start();
    }

    fn on_nop(&mut self) -> HandlerResult {
        HandlerResult::Continue
    }

    fn on_exit(&mut self) -> HandlerResult {
        HandlerResult::Finish
    }

    fn on_task_available(&mut self) -> HandlerResult {
        // Finding no task is the benign claim race among concurrently-woken
        // workers, silently absorbed
        if let Some(pending) = self.pending.upgrade() {
            if let Some(task) = pending.pop() {
                self.stats.run();
                let id = task.id();
                if let Err(TaskError::Panicked(msg)) = task.run() {
                    eprintln!("worker {}: task {} panicked: {}", self.name.lock(), id.as_u64(), msg);
                }
            }
        }
        HandlerResult::Continue
    }

    fn on_dump_stats(&mut self) -> HandlerResult {
        let snapshot = self.stats.load();
        let name = self.name.lock().clone();

        let _serialize = DUMP_LOCK.lock();
        let mut sink = self.sink.lock();
        let _ = write_report(&mut **sink, &name, &snapshot);
        HandlerResult::Continue
    }
}

/// One OS thread running the message dispatch loop
pub struct Worker {
    id: usize,
    name: Arc<Mutex<String>>,
    queue: Arc<SignalingQueue>,
    stats: Arc<AtomicStats>,
    sink: Arc<Mutex<DumpSink>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker; its loop thread starts immediately in the idle state
    pub(crate) fn spawn(id: usize, pending: Weak<TaskQueue>) -> Self {
        let name = Arc::new(Mutex::new(default_name(id)));
        let queue = Arc::new(SignalingQueue::new());
        let stats = Arc::new(AtomicStats::new());
        let sink: Arc<Mutex<DumpSink>> =
            Arc::new(Mutex::new(Box::new(io::stderr()) as DumpSink));

        let handle = {
            let queue = queue.clone();
            let mut work_loop = WorkLoop {
                pending,
                stats: stats.clone(),
                name: name.clone(),
                sink: sink.clone(),
            };
            thread::Builder::new()
                .name(format!("beehive-worker-{}", id))
                .spawn(move || {
                    work_loop.stats.idle().start();
                    queue.run_loop(&mut work_loop);
                })
                .expect("Failed to spawn worker thread")
        };

        Self {
            id,
            name,
            queue,
            stats,
            sink,
            handle: Some(handle),
        }
    }

    /// Get the worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the worker's human-readable name
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Rename the worker; an empty name resets to the id-derived default
    pub fn set_name(&self, name: &str) {
        let mut guard = self.name.lock();
        if name.is_empty() {
            *guard = default_name(self.id);
        } else {
            *guard = name.to_string();
        }
    }

    /// Send a message to this worker's mailbox
    pub fn send(&self, message: Message) {
        self.queue.send(message);
    }

    /// Signal the worker to stop its loop
    pub fn exit(&self) {
        self.send(Message::Exit);
    }

    /// Signal the worker that a task may be pending in the pool
    pub fn request_task(&self) {
        self.send(Message::TaskAvailable);
    }

    /// Signal the worker to emit its diagnostic report
    pub fn dump(&self) {
        self.send(Message::DumpStats);
    }

    /// Lock-free snapshot of this worker's statistics
    pub fn stats(&self) -> Stats {
        self.stats.load()
    }

    /// Identity of the loop thread, if it has not been joined yet
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Whether the loop thread has not been joined yet
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Get the CPU affinity mask of the loop thread
    pub fn affinity(&self) -> Result<CpuSet, PlatformError> {
        let handle = self.handle.as_ref().ok_or(PlatformError::WorkerStopped)?;
        platform::get_thread_affinity(handle)
    }

    /// Set the CPU affinity mask of the loop thread
    pub fn set_affinity(&self, mask: &CpuSet) -> Result<(), PlatformError> {
        let handle = self.handle.as_ref().ok_or(PlatformError::WorkerStopped)?;
        platform::set_thread_affinity(handle, mask)
    }

    /// Redirect diagnostic dump reports; the default sink is stderr
    pub fn set_dump_sink(&self, sink: DumpSink) {
        *self.sink.lock() = sink;
    }

    /// Read-only observer without destructive control over the worker
    pub fn view(&self) -> WorkerView<'_> {
        WorkerView { worker: self }
    }

    /// Signal `Exit` and join the loop thread; idempotent
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.queue.send(Message::Exit);
            handle.join().expect("Failed to join worker thread");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Read-only subset of worker operations for external observers
///
/// Exposes identity, statistics, and diagnostic requests, but no `exit` or
/// renaming.
pub struct WorkerView<'a> {
    worker: &'a Worker,
}

impl WorkerView<'_> {
    /// Get the worker id
    pub fn id(&self) -> usize {
        self.worker.id()
    }

    /// Get the worker's name
    pub fn name(&self) -> String {
        self.worker.name()
    }

    /// Snapshot the worker's statistics
    pub fn stats(&self) -> Stats {
        self.worker.stats()
    }

    /// Identity of the loop thread
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.worker.thread_id()
    }

    /// Get the worker's CPU affinity mask
    pub fn affinity(&self) -> Result<CpuSet, PlatformError> {
        self.worker.affinity()
    }

    /// Ask the worker to emit its diagnostic report
    pub fn dump(&self) {
        self.worker.dump();
    }

    /// Ask the worker to check the pool for pending work
    pub fn request_task(&self) {
        self.worker.request_task();
    }
}

fn default_name(id: usize) -> String {
    format!("worker[{}]", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::time::{Duration, Instant};

    /// Write half of a shared in-memory capture buffer
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_default_name_and_rename() {
        let mut worker = Worker::spawn(3, Weak::new());
        assert_eq!(worker.name(), "worker[3]");

        worker.set_name("crunch");
        assert_eq!(worker.name(), "crunch");

        // Empty name resets to the default
        worker.set_name("");
        assert_eq!(worker.name(), "worker[3]");

        worker.join();
    }

    #[test]
    fn test_nop_counts_messages_not_runs() {
        let mut worker = Worker::spawn(0, Weak::new());

        for _ in 0..50 {
            worker.send(Message::Nop);
        }
        assert!(wait_until(Duration::from_secs(2), || {
            worker.stats().messages >= 50
        }));

        let stats = worker.stats();
        assert_eq!(stats.messages, 50);
        assert_eq!(stats.runs, 0);

        worker.join();
    }

    #[test]
    fn test_runs_task_from_pending_queue() {
        let pending = Arc::new(TaskQueue::new());
        let mut worker = Worker::spawn(0, Arc::downgrade(&pending));

        let task = Task::new(|| {});
        let future = task.future();
        pending.push(task);
        worker.request_task();

        assert_eq!(future.wait_timeout(Duration::from_secs(2)), Some(Ok(())));
        assert!(wait_until(Duration::from_secs(2), || worker.stats().runs == 1));

        worker.join();
    }

    #[test]
    fn test_empty_queue_race_is_absorbed() {
        let pending = Arc::new(TaskQueue::new());
        let mut worker = Worker::spawn(0, Arc::downgrade(&pending));

        // Signaled with nothing queued: not an error, loop keeps going
        worker.request_task();
        worker.send(Message::Nop);
        assert!(wait_until(Duration::from_secs(2), || {
            worker.stats().messages >= 2
        }));
        assert_eq!(worker.stats().runs, 0);

        worker.join();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pending = Arc::new(TaskQueue::new());
        let mut worker = Worker::spawn(0, Arc::downgrade(&pending));

        let task = Task::new(|| panic!("deliberate"));
        let future = task.future();
        pending.push(task);
        worker.request_task();

        assert!(matches!(
            future.wait_timeout(Duration::from_secs(2)),
            Some(Err(TaskError::Panicked(_)))
        ));

        // The loop thread survived and still processes messages
        let second = Task::new(|| {});
        let second_future = second.future();
        pending.push(second);
        worker.request_task();
        assert_eq!(
            second_future.wait_timeout(Duration::from_secs(2)),
            Some(Ok(()))
        );

        worker.join();
    }

    #[test]
    fn test_dump_report_fields() {
        let mut worker = Worker::spawn(7, Weak::new());
        let captured = Arc::new(Mutex::new(Vec::new()));
        worker.set_dump_sink(Box::new(SharedBuf(captured.clone())));

        worker.send(Message::Nop);
        worker.dump();
        assert!(wait_until(Duration::from_secs(2), || {
            !captured.lock().is_empty()
        }));
        worker.join();

        let report = String::from_utf8(captured.lock().clone()).unwrap();
        assert!(report.contains("Thread: worker[7]"));
        assert!(report.contains("Number of tasks ran: 0"));
        assert!(report.contains("Number of messages processed:"));
        assert!(report.contains("Time active:"));
        assert!(report.contains("Time idle:"));
        assert!(report.contains("milliseconds"));
    }

    #[test]
    fn test_no_task_processing_after_exit() {
        let pending = Arc::new(TaskQueue::new());
        let mut worker = Worker::spawn(0, Arc::downgrade(&pending));

        let task = Task::new(|| {});
        let future = task.future();
        pending.push(task);

        // Exit is queued ahead of the wake-up, so the task is never claimed
        worker.exit();
        worker.request_task();
        worker.join();

        assert_eq!(future.poll(), None);
        assert!(pending.pop().is_some());
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut worker = Worker::spawn(0, Weak::new());
        assert!(worker.is_running());
        worker.join();
        assert!(!worker.is_running());
        assert!(worker.thread_id().is_none());
        worker.join();
    }

    #[test]
    fn test_view_exposes_read_only_surface() {
        let mut worker = Worker::spawn(2, Weak::new());
        {
            let view = worker.view();
            assert_eq!(view.id(), 2);
            assert_eq!(view.name(), "worker[2]");
            assert_eq!(view.stats().runs, 0);
            assert!(view.thread_id().is_some());
        }
        worker.join();
    }
}
