//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: accepting incoming TCP connections,
//! - [`stream`]: non-blocking reads, writes and vectored sends.

pub mod listener;
pub mod stream;
