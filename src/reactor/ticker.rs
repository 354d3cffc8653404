use super::poller::unix::{sys_close, sys_read_counter, sys_timerfd, sys_timerfd_arm};

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Periodic alarm driving idle-connection eviction.
///
/// A monotonic `timerfd` armed one-shot. The reactor registers it with the
/// poller and calls [`Ticker::acknowledge`] followed by [`Ticker::schedule`]
/// on every expiry, so the next tick is always scheduled by the tick owner.
pub(crate) struct Ticker {
    fd: RawFd,
    interval: Duration,
}

impl Ticker {
    pub(crate) fn new(interval: Duration) -> io::Result<Self> {
        Ok(Self {
            fd: sys_timerfd()?,
            interval,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Arms the next tick, one interval from now.
    pub(crate) fn schedule(&self) -> io::Result<()> {
        sys_timerfd_arm(self.fd, self.interval)
    }

    /// Consumes the expiry so the descriptor stops reporting readiness.
    ///
    /// Returns the number of expirations since the last call.
    pub(crate) fn acknowledge(&self) -> io::Result<u64> {
        sys_read_counter(self.fd)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
