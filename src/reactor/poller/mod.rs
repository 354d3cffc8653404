//! Readiness multiplexer.
//!
//! The poller is used by the reactor to:
//! - wait for readiness on the listener, the connections and the internal
//!   signal/tick/wake descriptors,
//! - re-arm one-shot connection registrations (from any thread),
//! - be woken when commands are queued for it.
//!
//! Only Linux (`epoll`) is supported.

pub(crate) mod common;
mod epoll;

pub(crate) mod unix;

pub use common::{Interest, TriggerMode};
pub(crate) use common::Waker;
pub(crate) use epoll::{Poller, Registry};
