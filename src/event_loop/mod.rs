//! Event Loop Module
//!
//! This module implements the readiness multiplexer that drives every
//! connection. It owns the registry of live handlers, polls the OS for
//! readiness, and hands each event to the handler that owns the socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Multiplexer                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌────────────────────────────────────┐  │
//! │  │ mio::Poll   │───>│ HashMap<Token, Entry>              │  │
//! │  │ (timeout)   │    │   interest + Box<dyn EventHandler> │  │
//! │  └─────────────┘    └────────────────┬───────────────────┘  │
//! │         ▲                            │ process_events       │
//! │         │ wake                       ▼                      │
//! │  ┌─────────────┐           ┌──────────────────┐             │
//! │  │ Shutdown    │           │   Connection     │             │
//! │  │ Handle      │           │ (read → write)   │             │
//! │  └─────────────┘           └──────────────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! - **Single-threaded**: all handler callbacks run on the thread calling
//!   [`Multiplexer::run`]; only the shutdown flag crosses threads
//! - **Bounded waits**: each poll is capped by `LoopConfig::poll_timeout`
//! - **Isolation**: a handler error closes that handler only
//! - **Termination**: the loop returns once no handlers remain, or after
//!   closing every handler when shutdown is requested
//!
//! Dispatch order within one poll result is whatever the OS reports.

pub mod dispatch;
pub mod multiplexer;

pub use dispatch::{Dispatch, EventHandler, Readiness};
pub use multiplexer::{
    Completed, LoopConfig, LoopError, Multiplexer, RunReport, ShutdownHandle,
    DEFAULT_EVENT_CAPACITY, DEFAULT_POLL_TIMEOUT,
};
