use super::unix::{sys_close, sys_eventfd, sys_read_counter, sys_write_counter};

use serde::{Deserialize, Serialize};
use std::io;
use std::os::fd::RawFd;

/// Readiness a registration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// How readiness is reported for a descriptor.
///
/// - `Level`: the event is re-delivered while the condition holds, so a
///   handler may consume input in several wake-ups.
/// - `Edge`: the event is delivered once per transition, so a handler must
///   drain the descriptor until it would block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Level,
    Edge,
}

/// Wakes a poller blocked in `poll` from another thread.
///
/// Backed by a non-blocking `eventfd` that is registered with the poller
/// under a reserved token.
pub(crate) struct Waker(RawFd);

impl Waker {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self(sys_eventfd()?))
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0
    }

    /// Interrupts the poller.
    pub(crate) fn wake(&self) {
        sys_write_counter(self.0, 1);
    }

    /// Resets the counter so the next `wake` reports readiness again.
    pub(crate) fn drain(&self) {
        let _ = sys_read_counter(self.0);
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}
