//! Framed Protocol Implementation
//!
//! This module implements the application protocol spoken by the client:
//! a 2-byte big-endian header length, a self-describing JSON header, and
//! a content section whose size the header declares.
//!
//! ## Modules
//!
//! - `types`: Header, content and message types, text encodings
//! - `codec`: Pure encoding of requests and decoding of header/content sections
//! - `parser`: Staged decoder that tolerates arbitrary fragmentation
//!
//! ## Example
//!
//! ```
//! use appwire::protocol::{decode_message, encode_request};
//! use appwire::request::create_request;
//!
//! let request = create_request("search", "ethan").unwrap();
//! let wire = encode_request(&request).unwrap();
//!
//! let (message, consumed) = decode_message(&wire).unwrap().unwrap();
//! assert_eq!(consumed, wire.len());
//! assert_eq!(message.content.as_json().unwrap()["action"], "search");
//! ```

pub mod codec;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{encode_message, encode_request};
pub use parser::{decode_message, FrameDecoder, ParseError, ParseResult, Phase, Step};
pub use types::{Content, Header, Message, TextEncoding};
