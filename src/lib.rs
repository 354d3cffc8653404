//! # Beacon
//!
//! **Beacon** is an event-driven HTTP/1.1 server for Linux built around a
//! single `epoll` reactor thread and a bounded pool of worker threads.
//!
//! - a **reactor** that accepts connections and registers every socket
//!   one-shot, so a connection is never handled by two threads at once,
//! - a **worker pool** fed by a bounded queue, with deferral instead of
//!   unbounded growth when it is full,
//! - a **timer min-heap** that evicts idle connections on a fixed tick,
//! - an **incremental request parser** that tolerates any fragmentation
//!   of the input across reads,
//! - zero-copy static file bodies through memory maps and vectored sends.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beacon::ServerBuilder;
//! use std::thread;
//!
//! let server = ServerBuilder::new()
//!     .address("127.0.0.1")
//!     .port(9006)
//!     .doc_root("./root")
//!     .build()?;
//!
//! let handle = server.handle();
//! let reactor = thread::spawn(move || server.run());
//!
//! // ...
//! handle.shutdown();
//! reactor.join().unwrap()?;
//! # Ok::<(), beacon::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`]: server settings, loadable from YAML
//! - [`http`]: parser, sessions, routes and responses
//! - [`reactor`]: the event loop and the timer heap
//! - [`runtime`]: the work queue and worker pool
//! - [`store`]: the backing store pool used by form handlers

mod builder;
mod utils;

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod net;
pub mod reactor;
pub mod runtime;
pub mod store;

pub use builder::ServerBuilder;
pub use config::{DispatchMode, ServerConfig, TriggerMode};
pub use error::{Error, Result};
pub use reactor::{Server, ServerHandle};
