//! Wire Protocol Data Types
//!
//! This module defines the data types carried by the framed protocol.
//! Every message on the wire has three sections:
//!
//! ```text
//! +--------------------+----------------------------+------------------------+
//! | header length (2)  |  JSON header (UTF-8)       |  content               |
//! | big-endian u16     |  `header length` bytes     |  `content-length` bytes|
//! +--------------------+----------------------------+------------------------+
//! ```
//!
//! ## Header
//!
//! The header is a JSON object that must carry these four keys:
//! - `byteorder` - informational, the sender's native byte order
//! - `content-type` - `text/json` for structured content, anything else is opaque
//! - `content-encoding` - text codec used for structured content
//! - `content-length` - exact byte length of the content section
//!
//! ## Example
//!
//! ```text
//! \x00\x60{"byteorder":"little","content-type":"text/json","content-encoding":"utf-8","content-length":35}
//! {"action":"search","value":"ethan"}
//! ```

use crate::protocol::parser::{ParseError, ParseResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Size of the big-endian header length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest header the 2-byte prefix can describe.
pub const MAX_HEADER_SIZE: usize = u16::MAX as usize;

/// Largest content section we are willing to buffer (64 MB)
pub const MAX_CONTENT_SIZE: u64 = 64 * 1024 * 1024;

/// Header keys that must be present, in the order they are checked.
pub const REQUIRED_HEADER_KEYS: [&str; 4] = [
    "byteorder",
    "content-length",
    "content-type",
    "content-encoding",
];

/// Content type names understood by the codec
pub mod content_type {
    /// Structured text content, JSON-encoded with the declared encoding.
    pub const JSON: &str = "text/json";
}

/// The metadata block preceding every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub byteorder: String,

    #[serde(rename = "content-type")]
    pub content_type: String,

    #[serde(rename = "content-encoding")]
    pub content_encoding: String,

    #[serde(rename = "content-length")]
    pub content_length: u64,
}

impl Header {
    /// Creates a header describing `content_length` bytes of content,
    /// stamped with this host's byte order.
    pub fn new(
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
        content_length: u64,
    ) -> Self {
        Self {
            byteorder: native_byteorder().to_string(),
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            content_length,
        }
    }

    /// Returns true if the content section holds structured text.
    pub fn is_json(&self) -> bool {
        is_json(&self.content_type)
    }
}

/// Returns true if `mime` denotes structured text.
pub fn is_json(mime: &str) -> bool {
    mime == content_type::JSON
}

/// Name of this host's byte order, as written into the `byteorder` key.
pub fn native_byteorder() -> &'static str {
    if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    }
}

/// The payload of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Structured text, decoded to a generic JSON value.
    Json(Value),

    /// Any non-textual content type, passed through untouched.
    Binary(Bytes),
}

impl Content {
    /// Returns the JSON value, if this is structured content.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(value) => Some(value),
            Content::Binary(_) => None,
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Json(value) => write!(f, "{}", value),
            Content::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// A fully decoded message: its header plus decoded content.
///
/// The client receives these as responses; a server decodes requests
/// into the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub content: Content,
}

impl Message {
    /// Returns the `result` member of a structured response.
    ///
    /// Responses are shaped `{"result": ...}`; anything else yields `None`.
    pub fn result(&self) -> Option<&Value> {
        self.content.as_json()?.as_object()?.get("result")
    }
}

/// Text codecs accepted in the `content-encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Ascii,
    Latin1,
}

impl TextEncoding {
    /// Resolves an encoding label, case-insensitively.
    pub fn from_label(label: &str) -> ParseResult<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            _ => Err(ParseError::UnsupportedEncoding(label.to_string())),
        }
    }

    /// Canonical label for this encoding.
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Encodes text into bytes, failing on characters this encoding cannot represent.
    pub fn encode(self, text: &str) -> ParseResult<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(ParseError::Unencodable(self.label().to_string()))
                }
            }
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| ParseError::Unencodable(self.label().to_string())),
        }
    }

    /// Decodes bytes into text, failing on sequences invalid for this encoding.
    pub fn decode(self, bytes: &[u8]) -> ParseResult<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| ParseError::InvalidText(e.to_string())),
            TextEncoding::Ascii => {
                if bytes.is_ascii() {
                    // ASCII is a subset of UTF-8
                    Ok(String::from_utf8_lossy(bytes).into_owned())
                } else {
                    Err(ParseError::InvalidText("non-ASCII byte in ascii content".into()))
                }
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
