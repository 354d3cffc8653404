//! HTTP/1.x request handling.
//!
//! - [`parser`]: incremental request parsing over a fixed buffer,
//! - [`session`]: the per-connection read/parse/respond/write cycle,
//! - [`route`]: the site's URL table and form handlers,
//! - [`response`] and [`file`]: response heads and mapped file bodies.

pub mod file;
pub mod parser;
pub mod request;
pub mod response;
pub mod route;
pub mod session;

pub use parser::{CheckState, HttpCode, LineStatus, RequestParser};
pub use request::{Method, Request, Version};
pub use response::StatusCode;
pub use session::{Action, ConnectionSession, SessionContext};
