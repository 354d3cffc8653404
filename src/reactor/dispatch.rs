//! Handing connection events to a handler.
//!
//! Every connection is registered one-shot, so once an event is delivered
//! no other event is reported for that connection until its handler
//! re-arms it. The handler (a pool worker, or the reactor thread itself)
//! runs with the session locked and re-arms before unlocking; the lock is
//! therefore only ever contended by the reactor closing a connection while
//! a handler finishes.

use super::command::{Command, ReactorHandle};
use super::event::Token;
use super::poller::{Interest, Registry, TriggerMode};
use crate::http::{Action, ConnectionSession};
use crate::runtime::Process;

use std::os::fd::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which session handler a dispatched event runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Read the socket, then parse.
    Read,

    /// Parse a pipelined request already in the buffer.
    Resume,
}

impl Step {
    fn run(self, session: &mut ConnectionSession) -> Action {
        match self {
            Step::Read => session.on_readable(),
            Step::Resume => session.resume(),
        }
    }
}

/// Shared ownership of one connection's session.
///
/// The session is taken out when the connection closes. A handler that
/// finds the slot empty knows the connection is gone and does nothing.
pub(crate) struct SessionCell {
    token: Token,
    fd: RawFd,
    trigger: TriggerMode,
    session: Mutex<Option<ConnectionSession>>,
}

impl SessionCell {
    pub(crate) fn new(token: Token, session: ConnectionSession) -> Self {
        Self {
            token,
            fd: session.stream().as_raw_fd(),
            trigger: session.trigger(),
            session: Mutex::new(Some(session)),
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Runs `handler` on the session, then re-arms for what it returned.
    ///
    /// Returns `Action::Close` when the connection must be closed, either
    /// because the handler asked for it, because it panicked or because
    /// re-arming failed. A closed session yields `None`.
    pub(crate) fn handle<F>(&self, registry: &Registry, handler: F) -> Option<Action>
    where
        F: FnOnce(&mut ConnectionSession) -> Action,
    {
        let mut guard = self.lock();
        let session = guard.as_mut()?;

        // Caught while the guard is held, so the lock is not poisoned.
        let action = match panic::catch_unwind(AssertUnwindSafe(|| handler(session))) {
            Ok(action) => action,
            Err(_) => {
                tracing::error!(token = ?self.token, "connection handler panicked");
                Action::Close
            }
        };

        Some(self.rearm(registry, action))
    }

    /// Runs the handler `step` selects.
    pub(crate) fn run(&self, registry: &Registry, step: Step) -> Option<Action> {
        self.handle(registry, |session| step.run(session))
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConnectionSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rearm(&self, registry: &Registry, action: Action) -> Action {
        let interest = match action {
            Action::Read => Interest::READABLE,
            Action::Write => Interest::WRITABLE,
            Action::Close | Action::Process => return action,
        };

        match registry.rearm(self.fd, self.token.as_u64(), interest, self.trigger) {
            Ok(()) => action,
            Err(e) => {
                tracing::debug!(token = ?self.token, error = %e, "failed to re-arm connection");
                Action::Close
            }
        }
    }

    /// Marks the session closed and returns it.
    ///
    /// Waits for a handler still running on it.
    pub(crate) fn take(&self) -> Option<ConnectionSession> {
        self.lock().take()
    }
}

/// Collaborators a worker needs to finish a connection event.
pub(crate) struct DispatchContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) reactor: ReactorHandle,
}

/// A connection event handed to the worker pool.
pub(crate) struct ConnectionTask {
    cell: Arc<SessionCell>,
    step: Step,
    context: Arc<DispatchContext>,
}

impl ConnectionTask {
    pub(crate) fn new(cell: Arc<SessionCell>, step: Step, context: Arc<DispatchContext>) -> Self {
        Self {
            cell,
            step,
            context,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.cell.token()
    }

    pub(crate) fn step(&self) -> Step {
        self.step
    }
}

impl Process for ConnectionTask {
    fn process(self) {
        let action = self.cell.run(&self.context.registry, self.step);

        if action == Some(Action::Close) {
            let token = self.cell.token();
            if self.context.reactor.send(Command::Close { token }).is_err() {
                tracing::debug!(?token, "reactor gone before close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::SessionContext;
    use crate::net::TcpStream;
    use crate::reactor::poller::Poller;
    use crate::store::StorePool;

    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn cell(poller: &Poller) -> (Arc<SessionCell>, UnixStream) {
        let (local, peer) = UnixStream::pair().unwrap();
        let context = Arc::new(SessionContext {
            doc_root: std::env::temp_dir(),
            store: Arc::new(StorePool::new(1).unwrap()),
            store_timeout: Duration::from_millis(10),
            read_buffer_size: 256,
            write_buffer_size: 256,
        });
        let session = ConnectionSession::new(
            TcpStream::from(OwnedFd::from(local)),
            "127.0.0.1:1".parse().unwrap(),
            TriggerMode::Level,
            context,
        );

        let token = Token::new(0, 0);
        let cell = Arc::new(SessionCell::new(token, session));
        poller
            .registry()
            .register(cell.fd(), token.as_u64(), Interest::READABLE, TriggerMode::Level, true)
            .unwrap();
        (cell, peer)
    }

    #[test]
    fn handlers_never_overlap() {
        let poller = Poller::new(4).unwrap();
        let registry = poller.registry();
        let (cell, _peer) = cell(&poller);

        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let (cell, registry) = (cell.clone(), registry.clone());
                let (busy, overlaps, runs) = (busy.clone(), overlaps.clone(), runs.clone());
                thread::spawn(move || {
                    for _ in 0..25 {
                        let action = cell.handle(&registry, |_| {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(200));
                            busy.store(false, Ordering::SeqCst);
                            runs.fetch_add(1, Ordering::SeqCst);
                            Action::Read
                        });
                        assert_eq!(action, Some(Action::Read));
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn panicking_handler_closes_without_poisoning() {
        let poller = Poller::new(4).unwrap();
        let registry = poller.registry();
        let (cell, _peer) = cell(&poller);

        let action = cell.handle(&registry, |_| panic!("handler failure"));
        assert_eq!(action, Some(Action::Close));

        assert!(cell.take().is_some());
        assert_eq!(cell.handle(&registry, |_| Action::Read), None);
    }

    #[test]
    fn process_step_is_not_rearmed() {
        let poller = Poller::new(4).unwrap();
        let registry = poller.registry();
        let (cell, _peer) = cell(&poller);

        assert_eq!(cell.handle(&registry, |_| Action::Process), Some(Action::Process));
    }
}
