//! Server configuration.
//!
//! A [`ServerConfig`] is an explicit value handed to the server at
//! construction; nothing reads global configuration afterwards. Every field
//! has a default, so a YAML file only needs to name what it changes:
//!
//! ```yaml
//! port: 8080
//! doc_root: ./root
//! workers: 4
//! conn_trigger: edge
//! dispatch: inline
//! ```

use crate::error::{Error, Result};
use crate::logging::LogConfig;
pub use crate::reactor::poller::TriggerMode;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a readable connection is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Parse and respond on a pool worker.
    #[default]
    Offload,

    /// Parse and respond on the reactor thread.
    Inline,
}

/// Every knob of a server instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, without the port.
    pub address: String,

    pub port: u16,

    /// Directory static files are served from.
    pub doc_root: PathBuf,

    /// Number of pool worker threads.
    pub workers: usize,

    /// Maximum number of tasks waiting for a worker.
    pub queue_capacity: usize,

    pub listen_trigger: TriggerMode,

    pub conn_trigger: TriggerMode,

    /// Enable a one second `SO_LINGER` on accepted sockets.
    pub linger: bool,

    pub dispatch: DispatchMode,

    /// Inactivity after which a connection is evicted.
    pub idle_timeout_ms: u64,

    /// Period of the eviction tick.
    pub tick_interval_ms: u64,

    pub max_connections: usize,

    /// Maximum number of events returned by one poll.
    pub max_events: usize,

    /// Size of each connection's read buffer. Bounds the request head and
    /// body together.
    pub read_buffer_size: usize,

    /// Size of each connection's response head buffer.
    pub write_buffer_size: usize,

    /// Listen backlog.
    pub backlog: i32,

    /// Number of handles in the backing store pool.
    pub store_connections: usize,

    /// How long a request waits for a store handle.
    pub store_timeout_ms: u64,

    /// Install SIGTERM/SIGINT handlers that stop the server.
    pub handle_signals: bool,

    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9006,
            doc_root: PathBuf::from("./root"),
            workers: 8,
            queue_capacity: 10_000,
            listen_trigger: TriggerMode::Level,
            conn_trigger: TriggerMode::Level,
            linger: false,
            dispatch: DispatchMode::Offload,
            idle_timeout_ms: 15_000,
            tick_interval_ms: 5_000,
            max_connections: 65_536,
            max_events: 10_000,
            read_buffer_size: 2048,
            write_buffer_size: 1024,
            backlog: 5,
            store_connections: 8,
            store_timeout_ms: 500,
            handle_signals: false,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::io("failed to read configuration file", e))?;
        Self::from_yaml_str(&source)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("workers", self.workers as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("max_connections", self.max_connections as u64),
            ("max_events", self.max_events as u64),
            ("read_buffer_size", self.read_buffer_size as u64),
            ("write_buffer_size", self.write_buffer_size as u64),
            ("store_connections", self.store_connections as u64),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(Error::invalid(format!("{name} must be > 0")));
            }
        }

        if self.backlog <= 0 {
            return Err(Error::invalid("backlog must be > 0"));
        }

        // Connection tokens keep the slot in 32 bits.
        if self.max_connections > u32::MAX as usize {
            return Err(Error::invalid("max_connections does not fit a token"));
        }

        Ok(())
    }

    /// `address:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Applies the classic numeric trigger combination.
    ///
    /// `0`: level/level, `1`: level listener and edge connections,
    /// `2`: edge listener and level connections, `3`: edge/edge.
    pub fn set_trigger_combination(&mut self, mode: u8) -> Result<()> {
        let (listen, conn) = match mode {
            0 => (TriggerMode::Level, TriggerMode::Level),
            1 => (TriggerMode::Level, TriggerMode::Edge),
            2 => (TriggerMode::Edge, TriggerMode::Level),
            3 => (TriggerMode::Edge, TriggerMode::Edge),
            other => {
                return Err(Error::invalid(format!(
                    "trigger combination must be 0..=3, got {other}"
                )));
            }
        };

        self.listen_trigger = listen;
        self.conn_trigger = conn;
        Ok(())
    }
}
