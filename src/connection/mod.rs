//! Connection Handler Module
//!
//! This module manages individual server connections. Each request gets
//! its own non-blocking socket and [`Connection`] handler, driven by the
//! [`Multiplexer`](crate::event_loop::Multiplexer) rather than by a
//! dedicated thread or task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Multiplexer                             │
//! │                  (event_loop module)                        │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ readable / writable
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Connection                               │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Queue req   │───>│ Send bytes  │───>│ Read bytes  │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ FrameDecoder│        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: would-block is a normal outcome, never an error
//! - **Partial writes**: the send buffer drops its sent prefix and resumes later
//! - **Fragmentation**: the decoder accepts input in pieces of any size
//! - **Statistics**: Tracks connection, byte and response counters

pub mod handler;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError, ConnectionStats};
