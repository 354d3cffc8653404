use crate::reactor::poller::unix::{
    sys_close, sys_recv, sys_send, sys_sendmsg, sys_set_linger, sys_set_nonblocking,
};

use std::io::{self, IoSlice};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// A connected, non-blocking stream socket.
///
/// Owns its descriptor and closes it on drop. All operations return
/// `ErrorKind::WouldBlock` instead of blocking.
#[derive(Debug)]
pub struct TcpStream {
    fd: RawFd,
}

impl TcpStream {
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Reads into `buffer`. `Ok(0)` means the peer closed its write side.
    pub fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        sys_recv(self.fd, buffer)
    }

    pub fn send(&self, buffer: &[u8]) -> io::Result<usize> {
        sys_send(self.fd, buffer)
    }

    /// Sends several buffers with a single system call.
    pub fn send_vectored(&self, buffers: &[IoSlice<'_>]) -> io::Result<usize> {
        sys_sendmsg(self.fd, buffers)
    }

    /// Enables or disables a one second `SO_LINGER` on close.
    pub fn set_linger(&self, enabled: bool) -> io::Result<()> {
        sys_set_linger(self.fd, enabled)
    }
}

impl From<OwnedFd> for TcpStream {
    /// Adopts a connected stream socket, switching it to non-blocking mode.
    fn from(fd: OwnedFd) -> Self {
        let fd = fd.into_raw_fd();
        let _ = sys_set_nonblocking(fd);
        Self { fd }
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    fn pair() -> (TcpStream, UnixStream) {
        let (local, peer) = UnixStream::pair().unwrap();
        (TcpStream::from(OwnedFd::from(local)), peer)
    }

    #[test]
    fn empty_socket_would_block() {
        let (stream, _peer) = pair();
        let mut buf = [0u8; 8];
        let err = stream.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn vectored_send_concatenates_buffers() {
        let (stream, mut peer) = pair();
        let n = stream
            .send_vectored(&[IoSlice::new(b"head "), IoSlice::new(b"body")])
            .unwrap();
        assert_eq!(n, 9);
        drop(stream);

        let mut out = String::new();
        peer.read_to_string(&mut out).unwrap();
        assert_eq!(out, "head body");
    }

    #[test]
    fn recv_returns_zero_after_peer_close() {
        let (stream, peer) = pair();
        drop(peer);
        let mut buf = [0u8; 8];
        assert_eq!(stream.recv(&mut buf).unwrap(), 0);
    }
}
