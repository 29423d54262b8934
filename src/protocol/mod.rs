//! Wire protocol types.
//!
//! Every message on the wire is three consecutive sections:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┬─────────────────────────┐
//! │ Length prefix (2B) │ Metadata header          │ Payload                 │
//! │ big-endian u16 = N │ N bytes of UTF-8 JSON    │ content-length bytes    │
//! └────────────────────┴──────────────────────────┴─────────────────────────┘
//! ```
//!
//! The metadata header is a JSON object with four required keys:
//! `byteorder`, `content-type`, `content-encoding` and `content-length`.

pub mod codec;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use codec::{
    decode_header, decode_length_prefix, decode_payload, encode_json, encode_message,
    LENGTH_PREFIX_LEN,
};

/// Content type for JSON payloads, the only kind the demo service answers.
pub const CONTENT_TYPE_JSON: &str = "text/json";

/// Default text encoding for headers and JSON payloads.
pub const ENCODING_UTF8: &str = "utf-8";

/// Decoded metadata header.
///
/// All four fields are present once decoding succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    /// Native byte order of the sender (`"little"` or `"big"`). Informational only.
    pub byteorder: String,
    #[serde(rename = "content-type")]
    pub content_type: String,
    #[serde(rename = "content-encoding")]
    pub content_encoding: String,
    /// Exact byte count of the encoded payload.
    #[serde(rename = "content-length")]
    pub content_length: usize,
}

/// Byte order tag of this host, as written into outgoing headers.
pub fn native_byteorder() -> &'static str {
    if cfg!(target_endian = "big") {
        "big"
    } else {
        "little"
    }
}

/// Application-level content of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured content for `text/json`.
    Json(serde_json::Value),
    /// Opaque bytes for any other content type.
    Binary(Bytes),
}

/// An outgoing message before it is framed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub content_type: String,
    pub content_encoding: String,
    pub content: Payload,
}

impl Message {
    /// A `text/json` message encoded as UTF-8.
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            content_type: CONTENT_TYPE_JSON.to_string(),
            content_encoding: ENCODING_UTF8.to_string(),
            content: Payload::Json(value),
        }
    }

    /// A message carrying raw bytes under a custom content type.
    pub fn binary(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            content_encoding: "binary".to_string(),
            content: Payload::Binary(bytes.into()),
        }
    }
}

/// A fully received message: its metadata header plus decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: MetadataHeader,
    pub payload: Payload,
}

impl Frame {
    /// The JSON payload, if this frame carries one.
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }
}
