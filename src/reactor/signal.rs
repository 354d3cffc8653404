//! In-band delivery of process signals.
//!
//! The signal handler does nothing but write the signal number, as one
//! byte, into a socket pair. The read end is registered with the poller, so
//! the reactor thread sees signals as ordinary readiness events and handles
//! them outside of signal context.

use super::poller::unix::{sys_close, sys_recv, sys_socketpair};
use crate::error::{Error, Result};

use libc::c_int;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Write end of the installed channel, or `-1`.
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_signal(signal: c_int) {
    let saved = unsafe { *libc::__errno_location() };

    let fd = NOTIFY_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signal as u8;
        unsafe {
            libc::send(
                fd,
                &byte as *const u8 as *const _,
                1,
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            );
        }
    }

    unsafe { *libc::__errno_location() = saved };
}

/// Installs `handler` for `signal`, blocking every other signal while it
/// runs and restarting interrupted system calls.
fn install(signal: c_int, handler: libc::sighandler_t) -> io::Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler;
    action.sa_flags = libc::SA_RESTART;

    unsafe { libc::sigfillset(&mut action.sa_mask) };

    let rc = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Ignores `SIGPIPE` for the whole process.
///
/// Sockets are written with `MSG_NOSIGNAL` already; this covers anything
/// else the process writes to.
pub(crate) fn ignore_sigpipe() -> io::Result<()> {
    install(libc::SIGPIPE, libc::SIG_IGN)
}

/// A process-wide self-pipe for `SIGTERM` and `SIGINT`.
///
/// Only one channel can be installed at a time.
pub(crate) struct SignalChannel {
    read: RawFd,
    write: RawFd,
}

impl SignalChannel {
    pub(crate) fn install() -> Result<Self> {
        let (read, write) =
            sys_socketpair().map_err(|e| Error::io("failed to create signal channel", e))?;

        if NOTIFY_FD
            .compare_exchange(-1, write, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            sys_close(read);
            sys_close(write);
            return Err(Error::invalid("signal handlers are already installed"));
        }

        let channel = Self { read, write };

        for signal in [libc::SIGTERM, libc::SIGINT] {
            install(signal, on_signal as extern "C" fn(c_int) as libc::sighandler_t)
                .map_err(|e| Error::io("failed to install signal handler", e))?;
        }

        Ok(channel)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.read
    }

    /// Drains the channel and returns the signals received since last call.
    pub(crate) fn drain(&self) -> Vec<c_int> {
        let mut signals = Vec::new();
        let mut buf = [0u8; 64];

        while let Ok(n) = sys_recv(self.read, &mut buf) {
            if n == 0 {
                break;
            }
            signals.extend(buf[..n].iter().map(|&b| c_int::from(b)));
        }

        signals
    }

    /// Whether `signal` asks the server to stop.
    pub(crate) fn is_termination(signal: c_int) -> bool {
        signal == libc::SIGTERM || signal == libc::SIGINT
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        for signal in [libc::SIGTERM, libc::SIGINT] {
            let _ = install(signal, libc::SIG_DFL);
        }

        NOTIFY_FD.store(-1, Ordering::Release);
        sys_close(self.read);
        sys_close(self.write);
    }
}
