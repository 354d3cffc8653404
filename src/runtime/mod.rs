//! Worker-side runtime components.
//!
//! This module contains the thread pool that executes connection work off
//! the reactor thread:
//! - [`WorkQueue`], the shared FIFO with blocking and non-blocking pop,
//! - [`WorkerPool`], the fixed set of threads draining it,
//! - the [`Process`] capability every queued task implements.

mod worker;

pub mod pool;
pub mod queue;

pub use pool::{QueueFull, WorkerPool};
pub use queue::WorkQueue;

/// A unit of work run by a pool worker.
///
/// The task is consumed by `process`, so each submitted task runs at most
/// once.
pub trait Process: Send + 'static {
    fn process(self);
}
