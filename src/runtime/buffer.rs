//! Per-connection byte accumulation.
//!
//! A `ByteBuffer` is a growable byte queue: bytes are appended at the tail
//! and consumed from the head. Receive buffers collect socket reads until a
//! protocol phase has its full byte requirement; send buffers hold framed
//! output until the OS confirms it was written.
//!
//! Consumption is all-or-nothing: `consume(n)` either removes exactly `n`
//! bytes or leaves the buffer untouched.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Default read size for a single non-blocking `read()` call.
pub const DEFAULT_RECV_CHUNK: usize = 4096;

/// Upper bound on the read size; larger requested chunks are clamped.
pub const MAX_RECV_CHUNK: usize = 1 << 20;

/// Append-at-tail, consume-from-head byte queue.
///
/// No capacity limit is imposed; growth is bounded only by available memory.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Add bytes at the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Remove and return the first `n` bytes.
    ///
    /// Returns `None`, leaving the buffer unchanged, if fewer than `n` bytes are held.
    pub fn consume(&mut self, n: usize) -> Option<Bytes> {
        if n > self.inner.len() {
            return None;
        }
        Some(self.inner.split_to(n).freeze())
    }

    /// Look at the first `n` bytes without removing them.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.inner.get(..n)
    }

    /// All buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Perform one `read()` of at most `chunk` bytes from `reader` into the tail.
    ///
    /// `chunk` is clamped to `1..=MAX_RECV_CHUNK`, so a zero chunk never
    /// reads as end of stream.
    ///
    /// Returns the byte count reported by the reader (`0` means end of stream).
    /// On error, including would-block, the buffer is left exactly as it was.
    pub fn read_from<R: Read>(&mut self, reader: &mut R, chunk: usize) -> io::Result<usize> {
        let chunk = chunk.clamp(1, MAX_RECV_CHUNK);
        let start = self.inner.len();
        self.inner.resize(start + chunk, 0);

        match reader.read(&mut self.inner[start..]) {
            Ok(n) => {
                self.inner.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.inner.truncate(start);
                Err(e)
            }
        }
    }

    /// Perform one `write()` of the buffered bytes to `writer`.
    ///
    /// Only the bytes the writer accepted are removed from the head.
    /// On error, including would-block, nothing is removed.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = writer.write(&self.inner)?;
        self.inner.advance(n);
        Ok(n)
    }
}
