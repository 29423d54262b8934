//! jsonframe: length-prefixed, self-describing message framing over
//! non-blocking TCP.
//!
//! Each message is a 2-byte big-endian header length, a JSON metadata
//! header of that many bytes, and a payload whose size and encoding the
//! header describes. Server and client drive the same per-connection
//! state machine from mio readiness events:
//! - the server accepts a connection, reads one request, answers once,
//!   and closes after its send buffer drains
//! - the client sends one request, reads one response, and closes
//!
//! The bundled service translates English words to Portuguese.

pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod translate;

pub use error::{CodecError, ConnectionError};
pub use protocol::{Frame, Message, MetadataHeader, Payload};
pub use runtime::{Server, ServerSettings, Service, ShutdownHandle};
pub use translate::{TranslationTable, Translator};
