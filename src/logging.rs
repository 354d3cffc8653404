//! Log sink setup.
//!
//! The crate logs through `tracing` everywhere. The reactor only emits
//! events at `debug`/`trace` on its hot path, so with the default `info`
//! level the reactor thread never formats per-request lines.
//!
//! ```rust,ignore
//! use beacon::logging::{LogConfig, init};
//!
//! init(&LogConfig::default())?;
//! tracing::info!(port = 9006, "listening");
//! ```

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether logging is enabled at all.
    pub enabled: bool,

    /// Default filter directive, e.g. `info` or `beacon=debug`.
    ///
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    pub thread_names: bool,

    /// Whether to include the target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            thread_names: true,
            include_target: false,
        }
    }
}

impl LogConfig {
    /// A configuration that installs nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| Error::Logging(format!("invalid log level: {e}"))),
        }
    }
}

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns [`Error::Logging`] if the level is not a valid filter or a
/// global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.filter()?)
        .with_thread_names(config.thread_names)
        .with_target(config.include_target)
        .with_level(true)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
