//! Text codec for uRTPS frames.
//!
//! Wire format:
//! ```text
//! <topic_name>|<value>
//! ```
//! UTF-8 text, one frame per UDP datagram. There is no length prefix, no
//! version byte and no checksum beyond what UDP/IP already provides.
//!
//! # Separator handling
//!
//! The separator `|` is forbidden inside topic names, so the first `|` in a
//! datagram always ends the name. Everything after it is the value, which may
//! itself contain `|`. Frames whose value has no `|` are byte-identical to the
//! format older peers emit and accept.

use std::fmt;

use thiserror::Error;

/// The byte separating the topic name from the value.
pub const SEPARATOR: char = '|';

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The datagram is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The datagram contains no `|` separator.
    #[error("frame has no '|' separator")]
    MissingSeparator,

    /// The topic name is empty or contains the separator.
    #[error("invalid topic name {0:?}: must be non-empty and must not contain '|'")]
    InvalidName(String),

    /// The datagram did not fit the receive buffer, so its tail was lost.
    #[error("datagram exceeds the {limit}-byte receive buffer")]
    Truncated { limit: usize },
}

/// One decoded (name, value) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Topic name; used as the routing key on the receiving side.
    pub name: String,
    /// Payload text.
    pub value: String,
}

impl Frame {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the frame as its `[name, value]` field sequence.
    pub fn fields(&self) -> [&str; 2] {
        [&self.name, &self.value]
    }

    /// Encodes this frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidName`] if the name is not a valid topic name.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_frame(&self.name, &self.value)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.name, self.value)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Returns `true` if `name` can be used as a topic name on the wire.
pub fn is_valid_topic_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(SEPARATOR)
}

/// Encodes a (name, value) pair into the UTF-8 bytes of `"{name}|{value}"`.
///
/// No length limit is enforced here; the UDP datagram size is the practical
/// bound.
///
/// # Errors
///
/// Returns [`CodecError::InvalidName`] if `name` is empty or contains `|`.
///
/// # Examples
///
/// ```rust
/// use urtps_core::protocol::{decode_frame, encode_frame};
///
/// let bytes = encode_frame("temp", "23.5").unwrap();
/// assert_eq!(bytes, b"temp|23.5");
///
/// let frame = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.fields(), ["temp", "23.5"]);
/// ```
pub fn encode_frame(name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
    if !is_valid_topic_name(name) {
        return Err(CodecError::InvalidName(name.to_string()));
    }

    let mut buf = Vec::with_capacity(name.len() + 1 + value.len());
    buf.extend_from_slice(name.as_bytes());
    buf.push(SEPARATOR as u8);
    buf.extend_from_slice(value.as_bytes());
    Ok(buf)
}

/// Decodes one datagram into a [`Frame`].
///
/// The name ends at the first `|`; the remainder (which may be empty or
/// contain further `|` characters) is the value.
///
/// # Errors
///
/// - [`CodecError::InvalidUtf8`] if the bytes are not UTF-8.
/// - [`CodecError::MissingSeparator`] if there is no `|`.
/// - [`CodecError::InvalidName`] if the name part is empty.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|e| CodecError::InvalidUtf8(e.to_string()))?;

    let (name, value) = text
        .split_once(SEPARATOR)
        .ok_or(CodecError::MissingSeparator)?;

    if name.is_empty() {
        return Err(CodecError::InvalidName(String::new()));
    }

    Ok(Frame::new(name, value))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
