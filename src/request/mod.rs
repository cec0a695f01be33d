//! Request Builder Module
//!
//! This module validates an action/value pair and turns it into a
//! [`Request`] ready for the codec. Validation happens before any socket
//! is opened, so an unsupported action never causes network activity.
//!
//! ## Flow
//!
//! ```text
//! (action, value)
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ create_request  │  (this module)
//! └────────┬────────┘
//!          │ Request
//!          ▼
//! ┌─────────────────┐
//! │ encode_request  │  (protocol module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Actions
//!
//! - `search` - content `{"action": "search", "value": <value>}` as `text/json`, `utf-8`

pub mod builder;

pub use builder::{create_request, Action, Request, RequestError};
