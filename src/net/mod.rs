//! TCP networking primitives.
//!
//! Thin RAII wrappers over non-blocking sockets. They perform no
//! buffering and never block: readiness is tracked by the reactor, and
//! `WouldBlock` is surfaced to the caller as-is.
mod tcp;

pub use tcp::listener::TcpListener;
pub use tcp::stream::TcpStream;
