/// Reserved token of the poller's internal waker.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

/// Reserved token of the listening socket.
pub(crate) const LISTENER_TOKEN: u64 = u64::MAX - 1;

/// Reserved token of the signal channel.
pub(crate) const SIGNAL_TOKEN: u64 = u64::MAX - 2;

/// Reserved token of the idle-eviction ticker.
pub(crate) const TICK_TOKEN: u64 = u64::MAX - 3;

/// A readiness event reported by the poller.
///
/// Produced by the poller and consumed by the reactor, which demultiplexes
/// on `token`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    /// Token the descriptor was registered under.
    pub(crate) token: u64,

    pub(crate) readable: bool,

    pub(crate) writable: bool,

    /// The peer hung up or the socket is in error.
    pub(crate) hangup: bool,
}

/// Identifies a connection slot and the generation that occupies it.
///
/// A slot is reused once its connection closes; the generation makes tokens
/// of earlier occupants stale instead of aliasing the new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        Token(((generation as u64) << 32) | (slot as u32 as u64))
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Token(raw)
    }

    pub fn slot(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}
