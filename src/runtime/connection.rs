//! Connection state machine.
//!
//! Each connection drives one request/response exchange:
//!
//! ```text
//! read:   AwaitingLengthPrefix -> AwaitingMetadataHeader -> AwaitingPayload -> PayloadReady
//! write:  Idle -> Queued -> Flushing -> Done
//! ```
//!
//! A read phase only advances once the receive buffer holds its full byte
//! requirement; it never consumes a partial section. Phases are never
//! revisited. The server side answers once and completes when its send
//! buffer is fully drained; the client side sends first and completes
//! when the response payload is decoded.
//!
//! The machine is generic over the socket (`Read + Write`), so the
//! dispatcher hands it a `mio::net::TcpStream` while tests hand it a
//! scripted in-memory stream.

use crate::error::{CodecError, ConnectionError, Result};
use crate::protocol::{
    decode_header, decode_length_prefix, decode_payload, encode_message, Frame, Message,
    MetadataHeader, LENGTH_PREFIX_LEN,
};
use crate::runtime::buffer::{ByteBuffer, DEFAULT_RECV_CHUNK};
use crate::runtime::Service;
use bytes::BytesMut;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use tracing::{debug, trace};

/// Readiness the connection wants to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    pub fn to_mio(self) -> mio::Interest {
        match self {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
            Interest::ReadWrite => mio::Interest::READABLE | mio::Interest::WRITABLE,
        }
    }
}

/// Which interests fired for one readiness event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
}

impl Ready {
    pub const READABLE: Ready = Ready {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Ready = Ready {
        readable: false,
        writable: true,
    };
}

impl From<&mio::event::Event> for Ready {
    fn from(event: &mio::event::Event) -> Self {
        // Hang-ups and errors surface through the next read/write call.
        Self {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// Inbound progress.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadPhase {
    /// Fewer than two bytes received.
    AwaitingLengthPrefix,
    /// Length prefix decoded; waiting for `header_len` header bytes.
    AwaitingMetadataHeader { header_len: u16 },
    /// Header decoded; waiting for `content-length` payload bytes.
    AwaitingPayload { header: MetadataHeader },
    /// Full message decoded.
    PayloadReady(Frame),
}

impl ReadPhase {
    /// Position in the read sequence, for ordering checks.
    pub fn ordinal(&self) -> u8 {
        match self {
            ReadPhase::AwaitingLengthPrefix => 0,
            ReadPhase::AwaitingMetadataHeader { .. } => 1,
            ReadPhase::AwaitingPayload { .. } => 2,
            ReadPhase::PayloadReady(_) => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadPhase::AwaitingLengthPrefix => "awaiting_length_prefix",
            ReadPhase::AwaitingMetadataHeader { .. } => "awaiting_metadata_header",
            ReadPhase::AwaitingPayload { .. } => "awaiting_payload",
            ReadPhase::PayloadReady(_) => "payload_ready",
        }
    }
}

/// Outbound progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WritePhase {
    /// Nothing serialized yet.
    Idle,
    /// Message serialized into the send buffer, nothing sent.
    Queued,
    /// Part of the send buffer has been accepted by the OS.
    Flushing,
    /// Send buffer fully drained.
    Done,
}

/// What the dispatcher should do after an event was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep the connection registered with this interest.
    Continue(Interest),
    /// The exchange is finished; close the connection.
    Complete,
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum bytes requested by a single `read()`.
    pub recv_chunk_size: usize,
    /// Largest content-length accepted, `None` for unlimited.
    pub max_content_length: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recv_chunk_size: DEFAULT_RECV_CHUNK,
            max_content_length: None,
        }
    }
}

enum Role {
    /// Answers one request through the service, then closes.
    Server { service: Arc<dyn Service> },
    /// Sends one request (held until queued), then waits for the response.
    Client { request: Option<Message> },
}

/// Protocol driver for one socket.
pub struct Connection {
    role: Role,
    limits: Limits,
    recv: ByteBuffer,
    send: ByteBuffer,
    read: ReadPhase,
    write: WritePhase,
    interest: Interest,
}

impl Connection {
    /// State for an accepted socket. Starts read-only.
    pub fn server(service: Arc<dyn Service>, limits: Limits) -> Self {
        Self::new(Role::Server { service }, limits, Interest::Read)
    }

    /// State for an opened socket that will send `request`. Starts read+write.
    pub fn client(request: Message, limits: Limits) -> Self {
        Self::new(
            Role::Client {
                request: Some(request),
            },
            limits,
            Interest::ReadWrite,
        )
    }

    fn new(role: Role, limits: Limits, interest: Interest) -> Self {
        Self {
            role,
            limits,
            recv: ByteBuffer::with_capacity(limits.recv_chunk_size.min(DEFAULT_RECV_CHUNK)),
            send: ByteBuffer::new(),
            read: ReadPhase::AwaitingLengthPrefix,
            write: WritePhase::Idle,
            interest,
        }
    }

    pub fn read_phase(&self) -> &ReadPhase {
        &self.read
    }

    pub fn write_phase(&self) -> WritePhase {
        self.write
    }

    /// Readiness currently wanted from the dispatcher.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Bytes received but not yet consumed by a read phase.
    pub fn recv_buffered(&self) -> usize {
        self.recv.len()
    }

    /// Bytes queued but not yet accepted by the OS.
    pub fn send_buffered(&self) -> usize {
        self.send.len()
    }

    /// The decoded inbound message, once the read path is complete.
    pub fn received(&self) -> Option<&Frame> {
        match &self.read {
            ReadPhase::PayloadReady(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn into_received(self) -> Option<Frame> {
        match self.read {
            ReadPhase::PayloadReady(frame) => Some(frame),
            _ => None,
        }
    }

    /// Handle one readiness event.
    ///
    /// The read side runs first, then the write side. Would-block from the
    /// socket ends the current side without error.
    pub fn process_events<S: Read + Write>(&mut self, io: &mut S, ready: Ready) -> Result<Progress> {
        if ready.readable {
            self.on_readable(io)?;
        }
        if ready.writable && !self.is_complete() {
            self.on_writable(io)?;
        }

        if self.is_complete() {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Continue(self.interest))
        }
    }

    fn is_complete(&self) -> bool {
        match self.role {
            Role::Server { .. } => self.write == WritePhase::Done,
            Role::Client { .. } => matches!(self.read, ReadPhase::PayloadReady(_)),
        }
    }

    /// Drain the socket into the receive buffer, advancing phases as bytes arrive.
    fn on_readable<R: Read>(&mut self, io: &mut R) -> Result<()> {
        while !matches!(self.read, ReadPhase::PayloadReady(_)) {
            match self.recv.read_from(io, self.limits.recv_chunk_size) {
                Ok(0) => return Err(ConnectionError::PeerClosed),
                Ok(n) => {
                    trace!(bytes = n, buffered = self.recv.len(), "Received");
                    self.advance_read()?;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Advance through every read phase whose byte requirement is now met.
    fn advance_read(&mut self) -> Result<()> {
        loop {
            let next = match &self.read {
                ReadPhase::AwaitingLengthPrefix => {
                    let Some(header_len) = decode_length_prefix(self.recv.as_slice()) else {
                        return Ok(());
                    };
                    self.recv.consume(LENGTH_PREFIX_LEN);
                    ReadPhase::AwaitingMetadataHeader { header_len }
                }
                ReadPhase::AwaitingMetadataHeader { header_len } => {
                    let Some(bytes) = self.recv.consume(usize::from(*header_len)) else {
                        return Ok(());
                    };
                    let header = decode_header(&bytes)?;
                    self.check_content_length(&header)?;
                    ReadPhase::AwaitingPayload { header }
                }
                ReadPhase::AwaitingPayload { header } => {
                    let Some(bytes) = self.recv.consume(header.content_length) else {
                        return Ok(());
                    };
                    let payload = decode_payload(header, &bytes)?;
                    ReadPhase::PayloadReady(Frame {
                        header: header.clone(),
                        payload,
                    })
                }
                ReadPhase::PayloadReady(_) => return Ok(()),
            };

            debug!(phase = next.name(), "Read phase complete");
            self.read = next;

            if matches!(self.read, ReadPhase::PayloadReady(_))
                && matches!(self.role, Role::Server { .. })
            {
                self.interest = Interest::Write;
            }
        }
    }

    fn check_content_length(&self, header: &MetadataHeader) -> Result<()> {
        match self.limits.max_content_length {
            Some(max) if header.content_length > max => Err(CodecError::PayloadTooLarge {
                size: header.content_length,
                max,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Queue the outgoing message once, then flush as much as the socket takes.
    fn on_writable<W: Write>(&mut self, io: &mut W) -> Result<()> {
        if self.write == WritePhase::Idle {
            let Some(message) = self.outgoing() else {
                return Ok(());
            };
            self.queue(&message)?;
        }
        self.flush(io)
    }

    /// The message this side should send now, if any.
    fn outgoing(&mut self) -> Option<Message> {
        match &mut self.role {
            Role::Server { service } => match &self.read {
                ReadPhase::PayloadReady(request) => Some(service.respond(request)),
                _ => None,
            },
            Role::Client { request } => request.take(),
        }
    }

    fn queue(&mut self, message: &Message) -> Result<()> {
        let mut framed = BytesMut::new();
        encode_message(message, &mut framed)?;
        self.send.append(&framed);
        self.write = WritePhase::Queued;
        debug!(bytes = framed.len(), "Message queued");
        Ok(())
    }

    fn flush<W: Write>(&mut self, io: &mut W) -> Result<()> {
        while !self.send.is_empty() {
            match self.send.write_to(io) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write = WritePhase::Flushing;
                    trace!(bytes = n, remaining = self.send.len(), "Sent");
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.write = WritePhase::Done;
        debug!("Send buffer drained");
        if matches!(self.role, Role::Client { .. }) {
            self.interest = Interest::Read;
        }
        Ok(())
    }
}
