use super::command::{Command, ReactorHandle};
use super::dispatch::{ConnectionTask, DispatchContext, SessionCell, Step};
use super::event::{Event, LISTENER_TOKEN, SIGNAL_TOKEN, TICK_TOKEN, Token};
use super::poller::{Interest, Poller, Registry, TriggerMode};
use super::signal::{self, SignalChannel};
use super::ticker::Ticker;
use super::timer::{TimerHandle, TimerHeap};
use crate::config::{DispatchMode, ServerConfig};
use crate::error::{Error, Result};
use crate::http::{Action, ConnectionSession, SessionContext};
use crate::net::{TcpListener, TcpStream};
use crate::runtime::WorkerPool;
use crate::store::StorePool;
use crate::utils::Slab;

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::time::{Duration, Instant};

/// Poll timeout used while refused events wait for room in the queue.
const DEFER_RETRY: Duration = Duration::from_millis(5);

/// Sent to clients accepted while the server is at its connection limit.
const BUSY_MESSAGE: &[u8] = b"Internal server busy";

/// One live connection, as seen by the reactor.
struct Connection {
    cell: Arc<SessionCell>,

    /// The connection's idle timer.
    timer: TimerHandle,
}

/// Live connections indexed by token.
struct ConnectionTable {
    slots: Slab<Connection>,

    /// Generation of the next occupant of each slot.
    generations: Vec<u32>,

    registry: Arc<Registry>,

    live: Arc<AtomicUsize>,
}

impl ConnectionTable {
    fn new(capacity: usize, registry: Arc<Registry>) -> Self {
        Self {
            slots: Slab::new(capacity),
            generations: Vec::new(),
            registry,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Token the next inserted connection will get.
    fn next_token(&mut self) -> Token {
        let slot = self.slots.vacant_key();
        if self.generations.len() <= slot {
            self.generations.resize(slot + 1, 0);
        }
        Token::new(slot, self.generations[slot])
    }

    fn insert(&mut self, connection: Connection) {
        self.slots.insert(connection);
        self.live.store(self.slots.len(), Ordering::Release);
    }

    /// Looks up a connection, ignoring stale tokens.
    fn get(&self, token: Token) -> Option<&Connection> {
        self.slots
            .get(token.slot())
            .filter(|connection| connection.cell.token() == token)
    }

    /// Closes a connection without touching its timer.
    ///
    /// The session is taken out of its cell, so queued tasks for it become
    /// no-ops, the socket is deregistered and then closed. Returns the
    /// connection's timer, which the caller must dispose of.
    fn release(&mut self, token: Token) -> Option<TimerHandle> {
        self.get(token)?;

        let slot = token.slot();
        let connection = self.slots.remove(slot);
        self.generations[slot] = (self.generations[slot] + 1) % u32::MAX;
        self.live.store(self.slots.len(), Ordering::Release);

        let session = connection.cell.take();
        if let Err(e) = self.registry.deregister(connection.cell.fd()) {
            tracing::trace!(?token, error = %e, "deregister failed");
        }
        drop(session);

        Some(connection.timer)
    }

    fn tokens(&self) -> Vec<Token> {
        self.slots
            .indices()
            .into_iter()
            .filter_map(|slot| self.slots.get(slot))
            .map(|connection| connection.cell.token())
            .collect()
    }
}

/// A cloneable handle to a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    reactor: ReactorHandle,
    live: Arc<AtomicUsize>,
    deferrals: Arc<AtomicUsize>,
}

impl ServerHandle {
    /// Asks the server to stop. Returns immediately.
    pub fn shutdown(&self) {
        if self.reactor.send(Command::Shutdown).is_err() {
            tracing::debug!("server already stopped");
        }
    }

    /// Number of currently open client connections.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of times a connection event was refused by the full work
    /// queue and deferred.
    pub fn deferred_events(&self) -> usize {
        self.deferrals.load(Ordering::Relaxed)
    }
}

/// The event-driven HTTP server.
///
/// A single reactor thread owns the listener, the poller, the connection
/// table and the idle timers:
/// - new connections are accepted and registered one-shot for reading,
/// - readable connections are parsed on a pool worker (or inline),
/// - writable connections are written on the reactor thread,
/// - idle connections are evicted on every tick,
/// - workers ask for closes through the command channel, so every close,
///   and every timer removal, happens here.
pub struct Server {
    config: ServerConfig,

    listener: TcpListener,

    poller: Poller,

    registry: Arc<Registry>,

    /// Buffer used to collect events from the poller.
    events: Vec<Event>,

    /// Channel receiving commands from workers and handles.
    receiver: Receiver<Command>,

    handle: ReactorHandle,

    timers: TimerHeap<Token>,

    table: ConnectionTable,

    /// Absent in inline dispatch mode.
    pool: Option<WorkerPool<ConnectionTask>>,

    dispatch: Arc<DispatchContext>,

    sessions: Arc<SessionContext>,

    ticker: Ticker,

    signals: Option<SignalChannel>,

    /// Events refused by a full queue, retried next turn.
    deferred: Vec<(Token, Step)>,

    deferrals: Arc<AtomicUsize>,

    running: bool,
}

impl Server {
    /// Binds the listener and sets up the reactor, without running it.
    pub fn bind(config: ServerConfig, store: Arc<StorePool>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_address(), config.backlog)
            .map_err(|e| Error::io("failed to bind listener", e))?;

        let poller =
            Poller::new(config.max_events).map_err(|e| Error::io("failed to create poller", e))?;
        let registry = poller.registry();

        registry
            .register(
                listener.as_raw_fd(),
                LISTENER_TOKEN,
                Interest::READABLE,
                config.listen_trigger,
                false,
            )
            .map_err(|e| Error::io("failed to register listener", e))?;

        let ticker = Ticker::new(config.tick_interval())
            .and_then(|ticker| {
                registry.register(
                    ticker.fd(),
                    TICK_TOKEN,
                    Interest::READABLE,
                    TriggerMode::Level,
                    false,
                )?;
                Ok(ticker)
            })
            .map_err(|e| Error::io("failed to create ticker", e))?;

        let signals = if config.handle_signals {
            signal::ignore_sigpipe().map_err(|e| Error::io("failed to ignore SIGPIPE", e))?;

            let channel = SignalChannel::install()?;
            registry
                .register(
                    channel.fd(),
                    SIGNAL_TOKEN,
                    Interest::READABLE,
                    TriggerMode::Level,
                    false,
                )
                .map_err(|e| Error::io("failed to register signal channel", e))?;
            Some(channel)
        } else {
            None
        };

        let pool = match config.dispatch {
            DispatchMode::Offload => Some(WorkerPool::new(config.workers, config.queue_capacity)?),
            DispatchMode::Inline => None,
        };

        let (sender, receiver) = channel();
        let handle = ReactorHandle::new(sender, poller.waker());

        let dispatch = Arc::new(DispatchContext {
            registry: registry.clone(),
            reactor: handle.clone(),
        });

        let sessions = Arc::new(SessionContext {
            doc_root: config.doc_root.clone(),
            store,
            store_timeout: config.store_timeout(),
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
        });

        let capacity = config.max_connections.min(1024);

        Ok(Self {
            events: Vec::with_capacity(config.max_events),
            timers: TimerHeap::new(capacity),
            table: ConnectionTable::new(capacity, registry.clone()),
            listener,
            poller,
            registry,
            receiver,
            handle,
            pool,
            dispatch,
            sessions,
            ticker,
            signals,
            deferred: Vec::new(),
            deferrals: Arc::new(AtomicUsize::new(0)),
            running: true,
            config,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::io("failed to read listener address", e))
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            reactor: self.handle.clone(),
            live: self.table.live.clone(),
            deferrals: self.deferrals.clone(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the event loop until shutdown is requested.
    ///
    /// The loop:
    /// 1. polls for readiness (shortly while events are deferred),
    /// 2. retries events deferred by a full queue,
    /// 3. handles the new events,
    /// 4. processes pending commands.
    ///
    /// Every connection is closed and the pool is drained before returning.
    pub fn run(mut self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            dispatch = ?self.config.dispatch,
            listen_trigger = ?self.config.listen_trigger,
            conn_trigger = ?self.config.conn_trigger,
            "server started"
        );

        self.ticker
            .schedule()
            .map_err(|e| Error::io("failed to arm ticker", e))?;

        let result = self.event_loop();
        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<()> {
        while self.running {
            let timeout = (!self.deferred.is_empty()).then_some(DEFER_RETRY);

            let mut events = mem::take(&mut self.events);
            self.poller
                .poll(&mut events, timeout)
                .map_err(|e| Error::io("poll failed", e))?;

            for (token, step) in mem::take(&mut self.deferred) {
                self.dispatch(token, step);
            }

            for event in events.iter().copied() {
                self.handle_event(event)?;
            }
            self.events = events;

            self.drain_commands();
        }

        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event.token {
            LISTENER_TOKEN => self.accept_all(),
            TICK_TOKEN => self.tick()?,
            SIGNAL_TOKEN => self.handle_signals(),
            raw => self.handle_connection(Token::from_raw(raw), event),
        }
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.receiver.try_recv() {
            match cmd {
                Command::Close { token } => self.close(token),
                Command::Shutdown => {
                    tracing::info!("shutdown requested");
                    self.running = false;
                }
            }
        }
    }

    /// Accepts every pending connection.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.table.len() >= self.config.max_connections {
            tracing::warn!(%peer, "connection limit reached");
            if let Err(e) = stream.send(BUSY_MESSAGE) {
                tracing::trace!(%peer, error = %e, "failed to send busy message");
            }
            return;
        }

        if self.config.linger {
            if let Err(e) = stream.set_linger(true) {
                tracing::debug!(%peer, error = %e, "failed to set SO_LINGER");
            }
        }

        let token = self.table.next_token();
        let fd = stream.as_raw_fd();
        let trigger = self.config.conn_trigger;

        let session = ConnectionSession::new(stream, peer, trigger, self.sessions.clone());
        let cell = Arc::new(SessionCell::new(token, session));
        let timer = self
            .timers
            .add(Instant::now() + self.config.idle_timeout(), token);

        self.table.insert(Connection { cell, timer });

        if let Err(e) = self
            .registry
            .register(fd, token.as_u64(), Interest::READABLE, trigger, true)
        {
            tracing::warn!(%peer, error = %e, "failed to register connection");
            self.close(token);
            return;
        }

        tracing::debug!(%peer, ?token, live = self.table.len(), "connection accepted");
    }

    fn handle_connection(&mut self, token: Token, event: Event) {
        if self.table.get(token).is_none() {
            tracing::trace!(?token, "event for a closed connection");
            return;
        }

        if event.hangup {
            tracing::debug!(?token, "peer hung up");
            self.close(token);
        } else if event.readable {
            self.touch(token);
            self.dispatch(token, Step::Read);
        } else if event.writable {
            self.handle_writable(token);
        }
    }

    /// Pushes the connection's idle deadline one timeout into the future.
    fn touch(&mut self, token: Token) {
        if let Some(connection) = self.table.get(token) {
            let timer = connection.timer;
            self.timers
                .adjust(timer, Instant::now() + self.config.idle_timeout());
        }
    }

    /// Parses a connection inline or on a worker.
    fn dispatch(&mut self, token: Token, step: Step) {
        let Some(connection) = self.table.get(token) else {
            return;
        };
        let cell = connection.cell.clone();

        let Some(pool) = self.pool.as_ref() else {
            if cell.run(&self.registry, step) == Some(Action::Close) {
                self.close(token);
            }
            return;
        };

        if let Err(full) = pool.submit(ConnectionTask::new(cell, step, self.dispatch.clone())) {
            let task = full.into_inner();
            tracing::debug!(token = ?task.token(), pending = pool.pending(), "work queue full, deferring");
            self.deferred.push((task.token(), task.step()));
            self.deferrals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Resumes a pending response on the reactor thread.
    ///
    /// A pipelined request found behind the response is parsed wherever
    /// readable connections are.
    fn handle_writable(&mut self, token: Token) {
        let Some(connection) = self.table.get(token) else {
            return;
        };
        let cell = connection.cell.clone();

        match cell.handle(&self.registry, ConnectionSession::on_writable) {
            Some(Action::Close) => self.close(token),
            Some(Action::Process) => {
                self.touch(token);
                self.dispatch(token, Step::Resume);
            }
            Some(_) => self.touch(token),
            None => {}
        }
    }

    /// Evicts every connection whose idle timer has expired.
    fn tick(&mut self) -> Result<()> {
        if let Err(e) = self.ticker.acknowledge() {
            tracing::debug!(error = %e, "failed to read ticker");
        }

        let table = &mut self.table;
        let evicted = self.timers.pop_expired(Instant::now(), |token| {
            if table.release(token).is_some() {
                tracing::debug!(?token, "idle connection evicted");
            }
        });

        if evicted > 0 {
            tracing::debug!(evicted, live = self.table.len(), "tick");
        }

        self.ticker
            .schedule()
            .map_err(|e| Error::io("failed to re-arm ticker", e))
    }

    fn handle_signals(&mut self) {
        let Some(signals) = &self.signals else {
            return;
        };

        for signal in signals.drain() {
            if SignalChannel::is_termination(signal) {
                tracing::info!(signal, "termination signal received");
                self.running = false;
            }
        }
    }

    /// Closes a connection and removes its timer.
    ///
    /// Stale tokens are ignored.
    fn close(&mut self, token: Token) {
        if let Some(timer) = self.table.release(token) {
            self.timers.remove(timer);
            tracing::debug!(?token, live = self.table.len(), "connection closed");
        }
    }

    /// Drains the pool, then closes every remaining connection.
    fn shutdown(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.shutdown();
        }

        // Close requests from the drained tasks are superseded below.
        while self.receiver.try_recv().is_ok() {}

        for token in self.table.tokens() {
            self.close(token);
        }

        tracing::info!("server stopped");
    }
}
