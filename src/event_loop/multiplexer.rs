//! Readiness multiplexer: registry of live handlers plus the poll loop.

use crate::connection::handler::DEFAULT_READ_CHUNK_SIZE;
use crate::connection::{Connection, ConnectionError, ConnectionStats};
use crate::event_loop::dispatch::{Dispatch, EventHandler, Readiness};
use crate::protocol::Message;
use crate::request::Request;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Token reserved for the shutdown waker.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Default poll timeout; bounds how long an interrupt can go unnoticed.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of readiness events taken per poll.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// Event loop configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Upper bound on a single poll call
    pub poll_timeout: Duration,
    /// Readiness events taken per poll
    pub event_capacity: usize,
    /// Bytes taken per receive on each connection
    pub read_chunk_size: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl LoopConfig {
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }
}

/// Errors that stop the loop itself, as opposed to a single connection.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The poller could not be created or polled
    #[error("poll error: {0}")]
    Poll(#[from] io::Error),

    /// A socket could not be registered
    #[error("failed to register {peer}: {source}")]
    Register {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// A response delivered by one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub peer: SocketAddr,
    pub message: Message,
}

/// Summary of one [`Multiplexer::run`].
#[derive(Debug, Default)]
pub struct RunReport {
    /// Responses in the order their connections completed
    pub responses: Vec<Completed>,
    /// Connections closed because of an error
    pub failures: usize,
    /// Whether the run ended through the shutdown handle
    pub interrupted: bool,
}

/// Cloneable handle that asks a running loop to tear down.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Requests shutdown and wakes the poll so it is noticed promptly.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            // The poll timeout still bounds the delay
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A registered handler and the interest it is registered with.
struct Entry {
    interest: Interest,
    handler: Box<dyn EventHandler>,
}

/// Single-threaded readiness loop over a set of connection handlers.
///
/// # Example
///
/// ```no_run
/// use appwire::event_loop::{LoopConfig, Multiplexer};
/// use appwire::request::create_request;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut mux = Multiplexer::new(LoopConfig::default())?;
/// mux.start_connection("127.0.0.1:65432".parse()?, create_request("search", "ethan")?);
///
/// let report = mux.run()?;
/// for completed in &report.responses {
///     println!("{}: {:?}", completed.peer, completed.message.result());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Multiplexer {
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Entry>,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    config: LoopConfig,
    stats: Arc<ConnectionStats>,
    /// Connections that failed before reaching the registry
    startup_failures: usize,
}

impl Multiplexer {
    /// Creates an empty multiplexer.
    pub fn new(config: LoopConfig) -> Result<Self, LoopError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity.max(1)),
            connections: HashMap::new(),
            next_token: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            config,
            stats: Arc::new(ConnectionStats::new()),
            startup_failures: 0,
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Statistics shared by every connection this loop starts.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns a handle that can stop [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Registers a handler with the given interest and takes ownership of it.
    pub fn register(
        &mut self,
        mut handler: Box<dyn EventHandler>,
        interest: Interest,
    ) -> Result<Token, LoopError> {
        let token = Token(self.next_token);
        self.next_token += 1;

        handler
            .register(self.poll.registry(), token, interest)
            .map_err(|source| LoopError::Register {
                peer: handler.peer_addr(),
                source,
            })?;

        trace!(peer = %handler.peer_addr(), token = token.0, "Registered handler");
        self.connections.insert(token, Entry { interest, handler });
        Ok(token)
    }

    /// Starts a non-blocking connect to `addr` that will send `request`.
    ///
    /// A connect or registration that fails immediately is a fault of this
    /// connection only: it is logged, counted in the next
    /// [`RunReport::failures`], and `None` is returned.
    pub fn start_connection(&mut self, addr: SocketAddr, request: Request) -> Option<Token> {
        info!(peer = %addr, "Starting connection");

        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Connect failed");
                self.startup_failures += 1;
                return None;
            }
        };
        let conn = Connection::new(
            stream,
            addr,
            request,
            self.config.read_chunk_size,
            Arc::clone(&self.stats),
        );

        match self.register(Box::new(conn), Interest::READABLE | Interest::WRITABLE) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(peer = %addr, error = %e, "Could not start connection");
                self.startup_failures += 1;
                None
            }
        }
    }

    /// Runs until every connection is closed or shutdown is requested.
    ///
    /// Connection-scoped failures are logged and close only the offending
    /// connection. On shutdown every remaining connection is closed before
    /// returning.
    pub fn run(&mut self) -> Result<RunReport, LoopError> {
        let mut report = RunReport {
            failures: std::mem::take(&mut self.startup_failures),
            ..RunReport::default()
        };

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(
                    connections = self.connections.len(),
                    "Shutdown requested, closing connections"
                );
                self.teardown();
                report.interrupted = true;
                break;
            }

            if self.connections.is_empty() {
                debug!("No connections remain registered");
                break;
            }

            match self
                .poll
                .poll(&mut self.events, Some(self.config.poll_timeout))
            {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Poll failed, closing connections");
                    self.teardown();
                    return Err(LoopError::Poll(e));
                }
            }

            let ready: Vec<(Token, Readiness)> = self
                .events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(|event| (event.token(), Readiness::from(event)))
                .collect();

            for (token, readiness) in ready {
                self.dispatch(token, readiness, &mut report);
            }
        }

        Ok(report)
    }

    /// Routes one readiness report to its handler.
    fn dispatch(&mut self, token: Token, readiness: Readiness, report: &mut RunReport) {
        let registry = self.poll.registry();
        let Some(entry) = self.connections.get_mut(&token) else {
            trace!(token = token.0, "Event for unregistered token");
            return;
        };

        let mut ctx = Dispatch::new(registry, token, &mut entry.interest);
        if let Err(e) = entry.handler.process_events(readiness, &mut ctx) {
            if matches!(e, ConnectionError::Protocol(_)) {
                self.stats.protocol_error();
            }
            warn!(
                peer = %entry.handler.peer_addr(),
                error = %e,
                "Error processing events, closing connection"
            );
            entry.handler.close(registry);
            report.failures += 1;
        }

        if entry.handler.is_closed() {
            if let Some(mut entry) = self.connections.remove(&token) {
                if let Some(message) = entry.handler.take_response() {
                    report.responses.push(Completed {
                        peer: entry.handler.peer_addr(),
                        message,
                    });
                }
            }
        }
    }

    /// Closes and forgets every registered handler.
    fn teardown(&mut self) {
        let registry = self.poll.registry();
        for (_, mut entry) in self.connections.drain() {
            entry.handler.close(registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::create_request;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Handler that never finishes on its own and counts closes.
    struct Idle {
        addr: SocketAddr,
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl EventHandler for Idle {
        fn peer_addr(&self) -> SocketAddr {
            self.addr
        }

        fn register(&mut self, _: &mio::Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }

        fn on_readable(&mut self, _: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn on_writable(&mut self, _: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn close(&mut self, _: &mio::Registry) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn fast_config() -> LoopConfig {
        LoopConfig::default().with_poll_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_empty_registry_returns_immediately() {
        let mut mux = Multiplexer::new(fast_config()).unwrap();
        let report = mux.run().unwrap();

        assert!(report.responses.is_empty());
        assert_eq!(report.failures, 0);
        assert!(!report.interrupted);
    }

    #[test]
    fn test_shutdown_closes_every_handler_once() {
        let mut mux = Multiplexer::new(fast_config()).unwrap();
        let closes = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let handler = Idle {
                addr: "127.0.0.1:9".parse().unwrap(),
                closes: Arc::clone(&closes),
                closed: false,
            };
            mux.register(Box::new(handler), Interest::READABLE).unwrap();
        }
        assert_eq!(mux.len(), 5);

        let handle = mux.shutdown_handle();
        handle.trigger();
        assert!(handle.is_triggered());

        let report = mux.run().unwrap();
        assert!(report.interrupted);
        assert_eq!(closes.load(Ordering::SeqCst), 5);
        assert!(mux.is_empty());
    }

    #[test]
    fn test_shutdown_from_another_thread() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut mux = Multiplexer::new(LoopConfig::default()).unwrap();
        for _ in 0..3 {
            mux.start_connection(addr, create_request("search", "ethan").unwrap())
                .unwrap();
        }
        let stats = mux.stats();

        // The listener never answers, so only the shutdown ends the run
        let handle = mux.shutdown_handle();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.trigger();
        });

        let report = mux.run().unwrap();
        trigger.join().unwrap();

        assert!(report.interrupted);
        assert!(report.responses.is_empty());
        assert_eq!(stats.connections_opened.load(Ordering::Relaxed), 3);
        assert_eq!(stats.connections_closed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        drop(listener);
    }

    #[test]
    fn test_refused_connection_is_isolated() {
        // Bind then drop to get a port nobody listens on
        let refused = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let mut mux = Multiplexer::new(fast_config()).unwrap();
        mux.start_connection(refused, create_request("search", "x").unwrap())
            .unwrap();

        let report = mux.run().unwrap();
        assert!(!report.interrupted);
        assert!(report.responses.is_empty());
        assert_eq!(report.failures, 1);
        assert!(mux.is_empty());
    }

    #[test]
    fn test_unreachable_address_counts_as_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let reachable = listener.local_addr().unwrap();
        let unreachable: SocketAddr = "255.255.255.255:80".parse().unwrap();

        let mut mux = Multiplexer::new(LoopConfig::default()).unwrap();
        assert!(mux
            .start_connection(unreachable, create_request("search", "x").unwrap())
            .is_none());
        assert!(mux.is_empty());
        mux.start_connection(reachable, create_request("search", "x").unwrap())
            .unwrap();
        assert_eq!(mux.len(), 1);

        let handle = mux.shutdown_handle();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.trigger();
        });
        let report = mux.run().unwrap();
        trigger.join().unwrap();

        assert!(report.interrupted);
        assert_eq!(report.failures, 1);
        assert_eq!(mux.stats().connections_opened.load(Ordering::Relaxed), 1);
        assert_eq!(mux.stats().active_connections.load(Ordering::Relaxed), 0);

        // The failure is reported once, not on every run
        assert_eq!(mux.run().unwrap().failures, 0);
        drop(listener);
    }

    #[test]
    fn test_failed_registration_leaves_stats_balanced() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut mux = Multiplexer::new(fast_config()).unwrap();
        let other = Poll::new().unwrap();
        let mut conn = Connection::new(
            TcpStream::connect(addr).unwrap(),
            addr,
            create_request("search", "x").unwrap(),
            DEFAULT_READ_CHUNK_SIZE,
            mux.stats(),
        );
        conn.close(other.registry());

        let result = mux.register(Box::new(conn), Interest::READABLE | Interest::WRITABLE);
        assert!(matches!(result, Err(LoopError::Register { peer, .. }) if peer == addr));
        assert!(mux.is_empty());

        let stats = mux.stats();
        assert_eq!(stats.connections_opened.load(Ordering::Relaxed), 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        drop(listener);
    }

    #[test]
    fn test_loop_config_builders() {
        let config = LoopConfig::default()
            .with_poll_timeout(Duration::from_millis(10))
            .with_event_capacity(0)
            .with_read_chunk_size(0);

        assert_eq!(config.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.read_chunk_size, 1);
    }
}
