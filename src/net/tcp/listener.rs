use super::stream::TcpStream;
use crate::reactor::poller::unix::{
    sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen, sys_parse_sockaddr,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking TCP listening socket.
pub struct TcpListener {
    /// File descriptor of the listening socket.
    fd: RawFd,
}

impl TcpListener {
    /// Binds a TCP listener to the given address.
    ///
    /// The address must be a valid socket address string, such as
    /// `"127.0.0.1:9006"` or `"[::1]:9006"`.
    ///
    /// This function:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening with the given backlog.
    pub fn bind(address: &str, backlog: i32) -> io::Result<Self> {
        let (storage, len) = sys_parse_sockaddr(address)?;
        let domain = storage.ss_family as i32;

        let fd = sys_socket(domain)?;
        let listener = Self { fd };

        sys_set_reuseaddr(fd)?;
        sys_ipv6_is_necessary(fd, domain)?;
        sys_bind(fd, &storage, len)?;
        sys_listen(fd, backlog)?;

        Ok(listener)
    }

    /// Accepts one pending connection.
    ///
    /// Returns `ErrorKind::WouldBlock` when the backlog is empty. The
    /// accepted stream is already non-blocking.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, address) = sys_accept(self.fd)?;

        Ok((TcpStream::from_raw(fd), address))
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpListener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
