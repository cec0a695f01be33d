//! # appwire - A Readiness-Driven Client for a Framed JSON Protocol
//!
//! appwire is a connection-oriented client for a small application protocol:
//! every message is a length-prefixed JSON header followed by a payload.
//! Sockets are non-blocking and driven by a single-threaded readiness loop.
//!
//! ## Features
//!
//! - **Framed Protocol**: 2-byte header length, self-describing JSON header, sized content
//! - **Fragmentation Tolerant**: a staged decoder accepts input in pieces of any size
//! - **Non-Blocking I/O**: built on `mio`, with explicit would-block and peer-closed outcomes
//! - **Isolated Failures**: one connection's protocol error never disturbs its siblings
//! - **Clean Teardown**: an interrupt closes every registered socket exactly once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              appwire                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Request    │───>│   Codec     │───>│ Connection  │                  │
//! │  │  Builder    │    │  (encode)   │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ readiness               │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Frame     │    │              Multiplexer                     │    │
//! │  │   Decoder   │<───│  mio::Poll + HashMap<Token, EventHandler>    │    │
//! │  │  (staged)   │    │  bounded poll timeout, shutdown waker        │    │
//! │  └─────────────┘    └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use appwire::event_loop::{LoopConfig, Multiplexer};
//! use appwire::request::create_request;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Validate the action before touching the network
//! let request = create_request("search", "ethan")?;
//!
//! let mut mux = Multiplexer::new(LoopConfig::default())?;
//! mux.start_connection("127.0.0.1:65432".parse()?, request);
//!
//! let report = mux.run()?;
//! for completed in report.responses {
//!     println!("{:?}", completed.message.result());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire types, pure codec, staged frame decoder
//! - [`request`]: action validation and request construction
//! - [`connection`]: per-socket handler with send buffer and decoder
//! - [`event_loop`]: readiness multiplexer and shutdown handle

pub mod connection;
pub mod event_loop;
pub mod protocol;
pub mod request;

// Re-export commonly used types for convenience
pub use connection::{Connection, ConnectionError, ConnectionStats};
pub use event_loop::{LoopConfig, LoopError, Multiplexer, RunReport, ShutdownHandle};
pub use protocol::{Content, FrameDecoder, Header, Message, ParseError};
pub use request::{create_request, Request, RequestError};

/// Version of appwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
