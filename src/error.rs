//! Error types for framing and connection handling.

use std::io;
use std::str::Utf8Error;
use thiserror::Error;

/// Errors raised while encoding or decoding a framed message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The metadata header or a JSON payload is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required metadata header key is absent.
    #[error("required header '{0}' is missing")]
    MissingHeaderField(&'static str),

    /// The content-encoding names a text encoding we cannot handle.
    #[error("unsupported content-encoding '{0}'")]
    UnsupportedEncoding(String),

    /// Payload bytes do not match the announced text encoding.
    #[error("payload is not valid text: {0}")]
    InvalidText(#[from] Utf8Error),

    /// Payload contains non-ASCII bytes under an ASCII content-encoding.
    #[error("payload is not valid ASCII")]
    InvalidAscii,

    /// The serialized metadata header does not fit the 2-byte length prefix.
    #[error("metadata header too large ({size} bytes, max {max})", max = u16::MAX)]
    HeaderTooLarge { size: usize },

    /// The announced content-length exceeds the configured limit.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors that end a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed its side while bytes were still expected.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The inbound message could not be decoded, or the outbound one encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Socket I/O failed with something other than would-block.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
