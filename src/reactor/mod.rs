//! Reactor core and event handling.
//!
//! The reactor is responsible for:
//! - accepting connections and registering them one-shot,
//! - demultiplexing readiness to inline handlers or the worker pool,
//! - evicting idle connections from the timer heap on every tick,
//! - turning signals and worker requests into in-band events.

mod command;
mod core;
mod dispatch;
mod signal;
mod ticker;

pub(crate) mod event;
pub(crate) mod poller;
pub mod timer;

pub use core::{Server, ServerHandle};
pub use event::Token;
pub use poller::{Interest, TriggerMode};
pub use timer::{TimerHandle, TimerHeap, TimerNode};
