use crate::config::{DispatchMode, ServerConfig, TriggerMode};
use crate::error::Result;
use crate::reactor::Server;
use crate::store::StorePool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a server.
///
/// Starts from [`ServerConfig::default`]; every setter overrides one field.
/// Values are validated once, in [`build`](Self::build).
///
/// # Examples
///
/// ```rust,no_run
/// use beacon::ServerBuilder;
///
/// let server = ServerBuilder::new()
///     .port(8080)
///     .doc_root("./root")
///     .workers(4)
///     .build()?;
///
/// server.run()?;
/// # Ok::<(), beacon::Error>(())
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    store: Option<Arc<StorePool>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::from_config(ServerConfig::default())
    }

    /// Starts from an existing configuration, e.g. one loaded from YAML.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Port to listen on. `0` picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn doc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.doc_root = root.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn listen_trigger(mut self, trigger: TriggerMode) -> Self {
        self.config.listen_trigger = trigger;
        self
    }

    pub fn conn_trigger(mut self, trigger: TriggerMode) -> Self {
        self.config.conn_trigger = trigger;
        self
    }

    pub fn linger(mut self, enabled: bool) -> Self {
        self.config.linger = enabled;
        self
    }

    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    /// Listen backlog.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    pub fn read_buffer_size(mut self, n: usize) -> Self {
        self.config.read_buffer_size = n;
        self
    }

    pub fn write_buffer_size(mut self, n: usize) -> Self {
        self.config.write_buffer_size = n;
        self
    }

    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// How long a form request waits for a store handle.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Shares an existing store pool instead of creating one with
    /// `store_connections` handles.
    pub fn store(mut self, store: Arc<StorePool>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validates the configuration and binds the server.
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(StorePool::new(self.config.store_connections)?),
        };

        Server::bind(self.config, store)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
