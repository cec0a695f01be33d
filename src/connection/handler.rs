//! Connection Handler Module
//!
//! This module owns one non-blocking client socket for the lifetime of a
//! single request/response exchange. The multiplexer calls into it
//! whenever the socket becomes readable or writable; each callback runs to
//! completion without blocking.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Multiplexer starts a non-blocking connect
//!        │
//!        ▼
//! 2. Registered for READABLE | WRITABLE
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────┐
//!    │  on_writable                     │
//!    │   - encode + queue request once  │
//!    │   - send until buffer empty      │
//!    │   - downgrade to READABLE        │
//!    └──────────────┬───────────────────┘
//!                   ▼
//! 4. ┌──────────────────────────────────┐
//!    │  on_readable                     │
//!    │   - receive available bytes      │
//!    │   - advance FrameDecoder         │
//!    └──────────────┬───────────────────┘
//!                   │
//!                   ▼
//! 5. Full response / peer closed / protocol error
//!        │
//!        ▼
//! 6. close(): deregister, shut down, drop socket
//! ```
//!
//! ## Buffer Management
//!
//! Received bytes go straight into the connection's [`FrameDecoder`],
//! which consumes them strictly from the front. Outgoing bytes sit in a
//! `BytesMut` send buffer that loses its sent prefix after every write,
//! so partial writes simply resume on the next writable event.

use crate::event_loop::{Dispatch, EventHandler};
use crate::protocol::{encode_request, FrameDecoder, Message, ParseError, Phase};
use crate::request::Request;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Default size of the local receive chunk (4 KB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections registered with a poller
    pub connections_opened: AtomicU64,
    /// Total number of connections closed
    pub connections_closed: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Total responses fully decoded
    pub responses_received: AtomicU64,
    /// Total connections closed because of a protocol error
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Result of a single non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    /// Bytes were appended to the decoder
    Data,
    /// Nothing available right now
    WouldBlock,
    /// The peer closed its side (zero-byte read)
    PeerClosed,
}

/// Result of a single non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Sent,
    WouldBlock,
}

/// Returns true for errors that only mean "try again on the next event".
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Handles a single client connection.
///
/// This struct owns the socket, the send buffer and the staged decoder
/// for one request/response exchange.
pub struct Connection {
    /// The socket; `None` once the connection has been closed
    stream: Option<TcpStream>,

    /// Server address (for logging)
    addr: SocketAddr,

    /// The request to send
    request: Request,

    /// Whether the request has been encoded into the send buffer
    request_queued: bool,

    /// Whether the socket was registered and counted as open
    registered: bool,

    /// Encoded bytes not yet accepted by the socket
    send_buffer: BytesMut,

    /// Receive buffer and parser state
    decoder: FrameDecoder,

    /// The decoded response, once complete
    response: Option<Message>,

    /// Local scratch buffer for a single receive
    chunk: Box<[u8]>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl Connection {
    /// Creates a handler for a socket whose connect is already in progress.
    ///
    /// # Arguments
    ///
    /// * `stream` - The non-blocking socket for this connection
    /// * `addr` - The server's socket address
    /// * `request` - The request to send once the socket is writable
    /// * `read_chunk_size` - Upper bound on bytes taken per receive
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        request: Request,
        read_chunk_size: usize,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let read_chunk_size = read_chunk_size.max(1);

        Self {
            stream: Some(stream),
            addr,
            request,
            request_queued: false,
            registered: false,
            send_buffer: BytesMut::new(),
            decoder: FrameDecoder::with_capacity(read_chunk_size),
            response: None,
            chunk: vec![0u8; read_chunk_size].into_boxed_slice(),
            stats,
        }
    }

    /// Server address this connection talks to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current phase of the response decoder.
    pub fn phase(&self) -> Phase {
        self.decoder.phase()
    }

    /// Whether the request has been encoded and queued for sending.
    pub fn request_queued(&self) -> bool {
        self.request_queued
    }

    /// Bytes queued but not yet sent.
    pub fn pending_send(&self) -> usize {
        self.send_buffer.len()
    }

    /// The decoded response, once the exchange completed.
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Handles read readiness.
    ///
    /// Drains whatever the socket has available, one bounded receive at a
    /// time, advancing the decoder after each receive. Completing the
    /// response or seeing the peer close ends the connection.
    pub fn on_readable(&mut self, registry: &Registry) -> Result<(), ConnectionError> {
        loop {
            match self.read()? {
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::PeerClosed => {
                    self.on_peer_closed();
                    self.close(registry);
                    return Ok(());
                }
                ReadOutcome::Data => {}
            }

            if let Some(message) = self.decoder.decode()? {
                self.on_response(message);
                self.close(registry);
                return Ok(());
            }
        }
    }

    /// Handles write readiness.
    ///
    /// Queues the encoded request on first call, then sends as much of the
    /// send buffer as the socket accepts. Once everything is sent, interest
    /// is narrowed to reads only.
    pub fn on_writable(&mut self, ctx: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
        if let Some(err) = self.stream()?.take_error()? {
            return Err(ConnectionError::IoError(err));
        }

        if !self.request_queued {
            self.queue_request()?;
        }

        while !self.send_buffer.is_empty() {
            match self.write()? {
                WriteOutcome::Sent => {}
                WriteOutcome::WouldBlock => return Ok(()),
            }
        }

        if self.request_queued && ctx.interest() != Interest::READABLE {
            let addr = self.addr;
            let stream = self.stream.as_mut().ok_or(ConnectionError::Closed)?;
            ctx.reregister(stream, Interest::READABLE)?;
            debug!(peer = %addr, "Request sent, waiting for response");
        }

        Ok(())
    }

    /// Closes the connection.
    ///
    /// Deregisters the socket, shuts it down and releases it. Failures are
    /// logged and swallowed. Calling this again is a no-op.
    pub fn close(&mut self, registry: &Registry) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        info!(peer = %self.addr, "Closing connection");

        if let Err(e) = registry.deregister(&mut stream) {
            warn!(peer = %self.addr, error = %e, "Failed to deregister socket");
        }

        if let Err(e) = stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(peer = %self.addr, error = %e, "Socket shutdown failed");
            }
        }
        drop(stream);

        if self.decoder.buffered() > 0 {
            debug!(
                peer = %self.addr,
                bytes = self.decoder.buffered(),
                "Discarding unconsumed bytes"
            );
        }

        if self.registered {
            self.stats.connection_closed();
        }
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, ConnectionError> {
        self.stream.as_mut().ok_or(ConnectionError::Closed)
    }

    /// Encodes the request and appends it to the send buffer.
    fn queue_request(&mut self) -> Result<(), ConnectionError> {
        let message = encode_request(&self.request)?;
        self.send_buffer.extend_from_slice(&message);
        self.request_queued = true;
        trace!(
            peer = %self.addr,
            action = %self.request.action(),
            bytes = message.len(),
            "Queued request"
        );
        Ok(())
    }

    /// Performs one receive into the local chunk.
    fn read(&mut self) -> Result<ReadOutcome, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::Closed)?;

        match stream.read(&mut self.chunk) {
            Ok(0) => Ok(ReadOutcome::PeerClosed),
            Ok(n) => {
                self.decoder.extend(&self.chunk[..n]);
                self.stats.bytes_read(n);
                trace!(
                    peer = %self.addr,
                    bytes = n,
                    buffered = self.decoder.buffered(),
                    "Read data"
                );
                Ok(ReadOutcome::Data)
            }
            Err(e) if is_transient(&e) => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Performs one send of the buffered bytes.
    fn write(&mut self) -> Result<WriteOutcome, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::Closed)?;

        match stream.write(&self.send_buffer) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                self.send_buffer.advance(n);
                self.stats.bytes_written(n);
                trace!(
                    peer = %self.addr,
                    bytes = n,
                    remaining = self.send_buffer.len(),
                    "Sent data"
                );
                Ok(WriteOutcome::Sent)
            }
            Err(e) if is_transient(&e) => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    fn on_response(&mut self, message: Message) {
        self.stats.response_received();
        match message.result() {
            Some(result) => info!(peer = %self.addr, result = %result, "Got result"),
            None => info!(peer = %self.addr, content = %message.content, "Received response"),
        }
        self.response = Some(message);
    }

    fn on_peer_closed(&self) {
        let phase = self.decoder.phase();
        if phase == Phase::AwaitLengthPrefix && self.decoder.buffered() == 0 {
            debug!(peer = %self.addr, "Peer closed connection");
        } else {
            warn!(
                peer = %self.addr,
                phase = ?phase,
                buffered = self.decoder.buffered(),
                "Peer closed connection mid-response"
            );
        }
    }
}

impl EventHandler for Connection {
    fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        registry.register(stream, token, interest)?;

        if !self.registered {
            self.registered = true;
            self.stats.connection_opened();
        }
        Ok(())
    }

    fn on_readable(&mut self, ctx: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
        Connection::on_readable(self, ctx.registry())
    }

    fn on_writable(&mut self, ctx: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
        Connection::on_writable(self, ctx)
    }

    fn close(&mut self, registry: &Registry) {
        Connection::close(self, registry)
    }

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }

    fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue, refused connect)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Malformed data from the peer, or a request that cannot be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The connection was used after it was closed
    #[error("Connection already closed")]
    Closed,
}
