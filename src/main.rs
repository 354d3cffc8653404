use beacon::config::{DispatchMode, ServerConfig};
use beacon::store::StorePool;
use beacon::{Server, logging};

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Event-driven HTTP/1.1 server.
#[derive(Debug, Parser)]
#[command(name = "beacon", version, about)]
struct Args {
    /// YAML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listening port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory served as the document root.
    #[arg(short = 'r', long)]
    doc_root: Option<PathBuf>,

    /// Close the log: 0 logging on, 1 logging off.
    #[arg(short = 'c', long = "close-log")]
    close_log: Option<u8>,

    /// Trigger combination: 0 LT+LT, 1 LT+ET, 2 ET+LT, 3 ET+ET.
    #[arg(short = 'm', long = "trigger")]
    trigger: Option<u8>,

    /// Graceful close: 0 off, 1 on (SO_LINGER).
    #[arg(short = 'o', long = "linger")]
    linger: Option<u8>,

    /// Number of store handles.
    #[arg(short = 's', long = "store")]
    store: Option<usize>,

    /// Number of worker threads.
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Dispatch model: 0 offload to workers, 1 inline on the reactor.
    #[arg(short = 'a', long = "actor")]
    actor: Option<u8>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.doc_root {
            config.doc_root = root;
        }
        if let Some(close_log) = self.close_log {
            config.log.enabled = close_log == 0;
        }
        if let Some(mode) = self.trigger {
            config.set_trigger_combination(mode)?;
        }
        if let Some(linger) = self.linger {
            config.linger = linger != 0;
        }
        if let Some(store) = self.store {
            config.store_connections = store;
        }
        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        if let Some(actor) = self.actor {
            config.dispatch = match actor {
                0 => DispatchMode::Offload,
                1 => DispatchMode::Inline,
                other => bail!("actor model must be 0 or 1, got {other}"),
            };
        }

        config.handle_signals = true;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    logging::init(&config.log).context("initializing logging")?;

    let store = Arc::new(StorePool::new(config.store_connections)?);
    let server = Server::bind(config, store).context("starting server")?;

    server.run()?;
    Ok(())
}
