use libc::{
    AF_INET, AF_INET6, AF_UNIX, F_GETFL, F_SETFL, IPPROTO_IPV6, IPV6_V6ONLY, MSG_NOSIGNAL,
    O_NONBLOCK, SO_LINGER, SO_REUSEADDR, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET,
    accept4, bind, c_int, close, fcntl, getsockname, iovec, linger, listen, msghdr, recv, send,
    sendmsg, setsockopt, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socketpair,
    socklen_t,
};
use std::io::{self, IoSlice};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::str::FromStr;
use std::{mem, ptr};

/// Converts a raw return value into an `io::Result`, capturing `errno`.
fn cvt(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Receives from a socket into the given buffer.
///
/// `Ok(0)` means the peer closed its side. The descriptor **must** be
/// non-blocking; an empty socket yields `ErrorKind::WouldBlock`.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt(unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) })
}

/// Sends a buffer on a socket without raising `SIGPIPE`.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt(unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), MSG_NOSIGNAL) })
}

/// Gathers several buffers into one `sendmsg(2)` call without raising
/// `SIGPIPE`.
pub(crate) fn sys_sendmsg(fd: RawFd, buffers: &[IoSlice<'_>]) -> io::Result<usize> {
    let mut header: msghdr = unsafe { mem::zeroed() };
    // IoSlice is ABI compatible with iovec on unix.
    header.msg_iov = buffers.as_ptr() as *mut iovec;
    header.msg_iovlen = buffers.len() as _;

    cvt(unsafe { sendmsg(fd, &header, MSG_NOSIGNAL) })
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking, close-on-exec stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

/// Creates a connected pair of non-blocking unix stream sockets.
pub(crate) fn sys_socketpair() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    let rc = unsafe {
        socketpair(
            AF_UNIX,
            SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok((fds[0], fds[1]))
    }
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is non-blocking and close-on-exec.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe {
        accept4(
            fd,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            SOCK_NONBLOCK | SOCK_CLOEXEC,
        )
    };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client_fd, addr)),
        Err(e) => {
            sys_close(client_fd);
            Err(e)
        }
    }
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    setsockopt_raw(fd, SOL_SOCKET, SO_REUSEADDR, &yes)
}

/// Configures `SO_LINGER`.
///
/// When enabled, `close(2)` blocks for up to one second while unsent data
/// drains, instead of returning immediately.
pub(crate) fn sys_set_linger(fd: RawFd, enabled: bool) -> io::Result<()> {
    let value = linger {
        l_onoff: c_int::from(enabled),
        l_linger: 1,
    };
    setsockopt_raw(fd, SOL_SOCKET, SO_LINGER, &value)
}

/// Sets the `IPV6_V6ONLY` socket option.
pub(crate) fn sys_set_v6only(fd: RawFd, v6only: bool) -> io::Result<()> {
    let value = c_int::from(v6only);
    setsockopt_raw(fd, IPPROTO_IPV6, IPV6_V6ONLY, &value)
}

/// Enables IPv6 dual-stack support when required.
pub(crate) fn sys_ipv6_is_necessary(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain == AF_INET6 {
        sys_set_v6only(fd, false)?;
    }
    Ok(())
}

fn setsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            value as *const T as *const _,
            mem::size_of::<T>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Parses a socket address string into a `sockaddr_storage`.
pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<(sockaddr_storage, socklen_t)> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

    Ok(socketaddr_to_storage(&addr))
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Creates a non-blocking, close-on-exec `eventfd`.
pub(crate) fn sys_eventfd() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// Creates a non-blocking monotonic `timerfd`.
pub(crate) fn sys_timerfd() -> io::Result<RawFd> {
    let fd = unsafe {
        libc::timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
        )
    };

    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// Arms a `timerfd` to fire once after `after`.
///
/// A zero duration would disarm the timer, so it is rounded up to one
/// nanosecond.
pub(crate) fn sys_timerfd_arm(fd: RawFd, after: std::time::Duration) -> io::Result<()> {
    let nanos = if after.is_zero() { 1 } else { after.subsec_nanos() };
    let spec = libc::itimerspec {
        it_interval: libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        it_value: libc::timespec {
            tv_sec: after.as_secs() as libc::time_t,
            tv_nsec: nanos as libc::c_long,
        },
    };

    let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, ptr::null_mut()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Reads the 8-byte counter of an `eventfd` or `timerfd`.
///
/// Returns `Ok(0)` when the counter is not ready yet.
pub(crate) fn sys_read_counter(fd: RawFd) -> io::Result<u64> {
    let mut value: u64 = 0;
    let rc = unsafe { libc::read(fd, &mut value as *mut u64 as *mut _, 8) };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(value)
}

/// Adds to the 8-byte counter of an `eventfd`.
pub(crate) fn sys_write_counter(fd: RawFd, value: u64) {
    unsafe {
        libc::write(fd, &value as *const u64 as *const _, 8);
    }
}
