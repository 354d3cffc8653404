//! Linux `epoll`-based poller.
//!
//! The epoll instance is split in two halves:
//! - [`Registry`] adds, re-arms and removes descriptors. It is shared
//!   behind an `Arc` so that worker threads can re-arm a connection once
//!   they are done with it.
//! - [`Poller`] owns the event buffer and blocks in `epoll_wait`. Only the
//!   reactor thread polls.
//!
//! Connections are registered one-shot (`EPOLLONESHOT`): after a single
//! delivery the descriptor is disarmed until [`Registry::rearm`] is called.

use super::common::{Interest, TriggerMode, Waker};
use super::unix::sys_close;
use crate::reactor::event::{Event, WAKE_TOKEN};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Registration half of the epoll instance.
pub(crate) struct Registry {
    epoll: RawFd,
}

impl Registry {
    /// Registers `fd` under `token`.
    ///
    /// One-shot registrations must be re-armed after every delivered event.
    pub(crate) fn register(
        &self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: TriggerMode,
        oneshot: bool,
    ) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, flags(interest, trigger, oneshot))
    }

    /// Re-arms a one-shot registration for the next event.
    pub(crate) fn rearm(
        &self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: TriggerMode,
    ) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, flags(interest, trigger, true))
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut event = epoll_event { events, u64: token };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}

fn flags(interest: Interest, trigger: TriggerMode, oneshot: bool) -> u32 {
    let mut flags = EPOLLRDHUP;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }
    if trigger == TriggerMode::Edge {
        flags |= EPOLLET;
    }
    if oneshot {
        flags |= EPOLLONESHOT;
    }

    flags as u32
}

/// Polling half of the epoll instance.
pub(crate) struct Poller {
    registry: Arc<Registry>,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    waker: Arc<Waker>,
}

impl Poller {
    /// Creates the epoll instance and registers an internal waker.
    ///
    /// At most `max_events` events are returned by a single `poll`.
    pub(crate) fn new(max_events: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let registry = Arc::new(Registry { epoll });
        let waker = Arc::new(Waker::new()?);

        registry.register(
            waker.fd(),
            WAKE_TOKEN,
            Interest::READABLE,
            TriggerMode::Level,
            false,
        )?;

        Ok(Self {
            registry,
            events: Vec::with_capacity(max_events.max(1)),
            waker,
        })
    }

    pub(crate) fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Waits for readiness events.
    ///
    /// Returns when at least one descriptor is ready, the waker fires, or
    /// `timeout` elapses. Wake-ups are consumed here and surface as an empty
    /// batch. Timeouts are rounded up to the next millisecond.
    pub(crate) fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = match timeout {
            Some(t) => t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
            None => -1,
        };

        let n = unsafe {
            epoll_wait(
                self.registry.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let token = ev.u64;

            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let bits = ev.events;
            events.push(Event {
                token,
                readable: bits & (EPOLLIN as u32) != 0,
                writable: bits & (EPOLLOUT as u32) != 0,
                hangup: bits & ((EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32) != 0,
            });
        }

        Ok(())
    }
}
