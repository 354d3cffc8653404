//! Error types.
//!
//! Only construction and startup failures surface as [`Error`]. Errors that
//! happen while serving a connection are resolved inside the session and
//! become an HTTP status or a close; they never reach the caller.

use crate::store::StoreError;

use std::io;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported while building or running a server.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is out of range (zero workers, zero queue
    /// capacity, empty buffers...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// An OS call failed during setup or in the reactor loop.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The log subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// The backing store could not be set up.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Error::Io { context, source }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }
}
