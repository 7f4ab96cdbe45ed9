//! Execution contexts for notification delivery.
//!
//! A reader never delivers callbacks on a thread of its own choosing. The
//! coordinator asks the reader's [`Scheduler`] to run the delivery, and the
//! scheduler decides where and when that happens.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs delivery tasks on behalf of a reader.
pub trait Scheduler: Send + Sync {
    /// Arranges for `task` to run on the reader's logical thread.
    fn schedule(&self, task: Task);
}

/// Runs tasks immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the owner drains them with [`QueueScheduler::run_pending`].
#[derive(Default)]
pub struct QueueScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl QueueScheduler {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs queued tasks, including tasks queued while running, and returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run without it.
            let Some(task) = self.queue.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
