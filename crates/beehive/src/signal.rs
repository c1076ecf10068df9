//! Signaling queue — a blocking, ordered mailbox of control messages
//!
//! One consumer thread runs the dispatch loop; any number of producers send.
//! Messages carry no payload: they are signals, not data transfers (a woken
//! worker fetches the actual task from the pool's shared queue).

use crossbeam::channel::{self, Receiver, Sender};

/// A small control signal delivered to exactly one worker's mailbox
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Message {
    /// Do nothing; useful for keep-alive and testing
    Nop,
    /// Stop the dispatch loop
    Exit,
    /// A task may be pending in the pool's shared queue
    TaskAvailable,
    /// Emit a diagnostic statistics report
    DumpStats,
}

/// Whether the dispatch loop keeps running after a handler returns
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    /// Loop again
    Continue,
    /// Exit the loop; the queue becomes inert
    Finish,
}

/// Consumer-side message handler
///
/// The mapping from message tag to handler method is the queue's dispatch
/// table, not the handler's concern. The before/after hooks wrap every
/// dispatched message so occupancy accounting covers all of them.
pub trait Handler {
    /// Called before each message is dispatched
    fn on_before_message(&mut self) {}
    /// Called after each message is dispatched
    fn on_after_message(&mut self) {}

    /// Handle [`Message::Nop`]
    fn on_nop(&mut self) -> HandlerResult;
    /// Handle [`Message::Exit`]
    fn on_exit(&mut self) -> HandlerResult;
    /// Handle [`Message::TaskAvailable`]
    fn on_task_available(&mut self) -> HandlerResult;
    /// Handle [`Message::DumpStats`]
    fn on_dump_stats(&mut self) -> HandlerResult;
}

/// Single-consumer, multi-producer blocking mailbox plus its dispatch loop
pub struct SignalingQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl SignalingQueue {
    /// Create an empty mailbox
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueue a message
    ///
    /// Never blocks the producer; wakes the consumer if it is waiting. Safe to
    /// call from any thread, including the consumer's own.
    pub fn send(&self, message: Message) {
        // The receiver lives as long as self, so this cannot disconnect
        let _ = self.tx.send(message);
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the mailbox is currently empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Run the dispatch loop; consumer thread only
    ///
    /// Blocks until a message is available, dequeues in FIFO order, invokes
    /// the matching handler method wrapped in the before/after hooks, and
    /// stops once a handler returns [`HandlerResult::Finish`]. Messages
    /// enqueued after that point are not processed.
    pub fn run_loop<H: Handler>(&self, handler: &mut H) {
        loop {
            let message = match self.rx.recv() {
                Ok(m) => m,
                Err(_) => break,
            };

            handler.on_before_message();
            let result = match message {
                Message::Nop => handler.on_nop(),
                Message::Exit => handler.on_exit(),
                Message::TaskAvailable => handler.on_task_available(),
                Message::DumpStats => handler.on_dump_stats(),
            };
            handler.on_after_message();

            if result == HandlerResult::Finish {
                break;
            }
        }
    }
}

impl Default for SignalingQueue {
    fn default() -> Self {
        Self::new()
    }
}
