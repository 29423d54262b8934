//! Readiness-based runtime.
//!
//! Single-threaded and callback-driven on top of mio (epoll on Linux,
//! kqueue on macOS):
//! - `ByteBuffer`: per-connection receive/send accumulation
//! - `Connection`: per-connection protocol state machine
//! - `Server`: accept loop plus registration table dispatching readiness
//!   events to connections
//! - `client::exchange`: drives a single outbound connection to completion

mod buffer;
pub mod client;
mod connection;
mod event_loop;

pub use buffer::{ByteBuffer, DEFAULT_RECV_CHUNK};
pub use connection::{Connection, Interest, Limits, Progress, ReadPhase, Ready, WritePhase};
pub use event_loop::{Server, ServerSettings, ShutdownHandle};

use crate::protocol::{Frame, Message};

/// Application logic answering a decoded request.
///
/// Called at most once per connection, after the full request is received.
pub trait Service: Send + Sync {
    fn respond(&self, request: &Frame) -> Message;
}
