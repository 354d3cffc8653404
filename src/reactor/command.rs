use super::event::Token;
use super::poller::Waker;

use std::sync::Arc;
use std::sync::mpsc::{SendError, Sender};

/// Requests sent to the reactor thread from other threads.
#[derive(Debug)]
pub(crate) enum Command {
    /// Close the connection identified by `token`, if it is still the one
    /// occupying its slot.
    Close { token: Token },

    /// Stop the event loop.
    Shutdown,
}

/// A handle used to communicate with the reactor thread.
///
/// Cloning this handle allows worker threads and server handles to send
/// commands and wake the reactor so that they are handled promptly.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    /// Sender side of the command channel.
    sender: Sender<Command>,

    /// Waker used to interrupt the poller.
    waker: Arc<Waker>,
}

impl ReactorHandle {
    pub(crate) fn new(sender: Sender<Command>, waker: Arc<Waker>) -> Self {
        Self { sender, waker }
    }

    /// Sends a command to the reactor and wakes it.
    pub(crate) fn send(&self, cmd: Command) -> Result<(), SendError<Command>> {
        let result = self.sender.send(cmd);
        self.waker.wake();
        result
    }
}
