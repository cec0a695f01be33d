//! Staged Frame Decoder
//!
//! This module implements the incremental decoder for the wire format.
//! Bytes arrive in whatever pieces the socket hands us, so decoding is a
//! state machine that advances only when enough input is buffered.
//!
//! ## Phases
//!
//! ```text
//! AwaitLengthPrefix ──(2 bytes)──> AwaitHeader ──(N bytes)──> AwaitContent ──(content-length)──> Complete
//! ```
//!
//! Transitions only ever move right. Each call to [`FrameDecoder::step`]
//! returns one of:
//! - `Ok(Step::Incomplete)` - the current phase needs more bytes
//! - `Ok(Step::Advanced(phase))` - a phase finished, the decoder is now in `phase`
//! - `Ok(Step::Complete(message))` - the content phase finished
//! - `Err(ParseError)` - invalid protocol data
//!
//! The decoder owns its receive buffer. Bytes are consumed strictly from
//! the front, and bytes beyond what the current phase needs are kept for
//! the next one.

use crate::protocol::codec::{decode_content, decode_header};
use crate::protocol::types::{Header, Message, LENGTH_PREFIX_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A required header key is absent
    #[error("missing required header '{0}'")]
    MissingHeader(&'static str),

    /// Header bytes are not a well-formed header object
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Structured content is not valid JSON
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// Bytes are not valid in the declared text encoding
    #[error("invalid text: {0}")]
    InvalidText(String),

    /// The declared text encoding is not supported
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    /// Text cannot be represented in the requested encoding
    #[error("content cannot be encoded as {0}")]
    Unencodable(String),

    /// Content value does not match the declared content type
    #[error("content does not match content type '{0}'")]
    ContentTypeMismatch(String),

    /// Encoded header does not fit the 2-byte length prefix
    #[error("header too large: {size} bytes (max: {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// Declared content length exceeds what we are willing to buffer
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: u64 },

    /// The decoder already produced its message
    #[error("decoder already complete")]
    AlreadyComplete,
}

/// Result type for codec operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Observable phase of a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AwaitLengthPrefix,
    AwaitHeader,
    AwaitContent,
    Complete,
}

/// Internal state, carrying what each phase has learned so far.
#[derive(Debug)]
enum State {
    AwaitLengthPrefix,
    AwaitHeader { header_len: usize },
    AwaitContent { header: Header },
    Complete,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::AwaitLengthPrefix => Phase::AwaitLengthPrefix,
            State::AwaitHeader { .. } => Phase::AwaitHeader,
            State::AwaitContent { .. } => Phase::AwaitContent,
            State::Complete => Phase::Complete,
        }
    }
}

/// Outcome of a single decoder step.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Not enough bytes buffered for the current phase
    Incomplete,

    /// A phase finished; the decoder moved to the contained phase
    Advanced(Phase),

    /// The final phase finished, yielding the decoded message
    Complete(Message),
}

/// Incremental decoder for one framed message.
///
/// # Example
///
/// ```
/// use appwire::protocol::{encode_request, FrameDecoder};
/// use appwire::request::create_request;
///
/// let wire = encode_request(&create_request("search", "ethan").unwrap()).unwrap();
/// let mut decoder = FrameDecoder::new();
///
/// for byte in wire.iter() {
///     decoder.extend(&[*byte]);
///     if let Some(message) = decoder.decode().unwrap() {
///         assert_eq!(message.content.as_json().unwrap()["value"], "ethan");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    buffer: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder waiting for a length prefix.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    /// Creates a decoder with a pre-sized receive buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: State::AwaitLengthPrefix,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Number of received bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the decoded header once the header phase has completed
    /// and content is still pending.
    pub fn header(&self) -> Option<&Header> {
        match &self.state {
            State::AwaitContent { header } => Some(header),
            _ => None,
        }
    }

    /// Appends received bytes to the back of the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Advances through one phase if the buffer allows it.
    ///
    /// On error the state and buffer are left untouched, so no bytes of a
    /// rejected section are consumed.
    pub fn step(&mut self) -> ParseResult<Step> {
        match self.state {
            State::AwaitLengthPrefix => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(Step::Incomplete);
                }
                let header_len = self.buffer.get_u16() as usize;
                self.state = State::AwaitHeader { header_len };
                Ok(Step::Advanced(Phase::AwaitHeader))
            }
            State::AwaitHeader { header_len } => {
                if self.buffer.len() < header_len {
                    return Ok(Step::Incomplete);
                }
                let header = decode_header(&self.buffer[..header_len])?;
                self.buffer.advance(header_len);
                self.state = State::AwaitContent { header };
                Ok(Step::Advanced(Phase::AwaitContent))
            }
            State::AwaitContent { ref header } => {
                // Bounded by MAX_CONTENT_SIZE at header decode
                let content_len = header.content_length as usize;
                if self.buffer.len() < content_len {
                    return Ok(Step::Incomplete);
                }
                let content =
                    decode_content(header, Bytes::copy_from_slice(&self.buffer[..content_len]))?;
                let message = Message {
                    header: header.clone(),
                    content,
                };
                self.buffer.advance(content_len);
                self.state = State::Complete;
                Ok(Step::Complete(message))
            }
            State::Complete => Err(ParseError::AlreadyComplete),
        }
    }

    /// Advances as far as the buffered bytes allow.
    ///
    /// Returns the message once the final phase completes, `None` if more
    /// bytes are needed, and `None` again on later calls after completion.
    pub fn decode(&mut self) -> ParseResult<Option<Message>> {
        loop {
            if self.phase() == Phase::Complete {
                return Ok(None);
            }
            match self.step()? {
                Step::Incomplete => return Ok(None),
                Step::Advanced(_) => continue,
                Step::Complete(message) => return Ok(Some(message)),
            }
        }
    }
}

/// Decodes a single message from a complete buffer.
///
/// Returns the message and the number of bytes it occupied, or `None`
/// if the buffer holds less than one full message.
pub fn decode_message(buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
    let mut decoder = FrameDecoder::with_capacity(buf.len());
    decoder.extend(buf);
    Ok(decoder
        .decode()?
        .map(|message| (message, buf.len() - decoder.buffered())))
}
