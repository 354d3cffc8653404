use super::queue::WorkQueue;
use super::Process;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A worker thread in the pool.
///
/// A `Worker` repeatedly takes the next task from the shared queue and
/// runs it. It parks inside [`WorkQueue::wait_and_pop`] when there is no
/// work, and leaves its loop once the queue has been closed and drained.
pub(crate) struct Worker<T> {
    /// Identifier of the worker, used in log lines.
    id: usize,

    /// Queue shared with the pool and every other worker.
    queue: Arc<WorkQueue<T>>,

    /// Pool-wide count of tasks that finished running.
    completed: Arc<AtomicUsize>,
}

impl<T: Process> Worker<T> {
    pub(crate) fn new(id: usize, queue: Arc<WorkQueue<T>>, completed: Arc<AtomicUsize>) -> Self {
        Self {
            id,
            queue,
            completed,
        }
    }

    /// Runs the worker loop until shutdown.
    pub(crate) fn run(self) {
        tracing::debug!(worker = self.id, "worker started");

        while let Some(task) = self.queue.wait_and_pop() {
            task.process();
            self.completed.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }
}
