//! The socket contract - what the core needs from a TCP stack.
//!
//! One [`SocketHandle`] exists per accepted connection. Outbound calls go
//! through the handle; inbound events (data, remote close, errors, sent
//! acknowledgments) are delivered to the [`crate::Network`] by whoever
//! owns the stack.

use std::collections::VecDeque;

use bytes::Bytes;

/// Flags passed with every [`SocketHandle::send`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// The stack must copy the bytes; the caller's buffer is reused.
    pub copy: bool,
    /// More data follows as part of the same write.
    pub more: bool,
}

/// Handle to one connection inside the TCP stack.
pub trait SocketHandle: Send + Sync + 'static {
    /// Queue bytes for transmission. Must not exceed the send window.
    fn send(&self, data: &[u8], flags: SendFlags) -> Result<(), SocketError>;

    /// Push queued bytes onto the wire.
    fn flush(&self) -> Result<(), SocketError>;

    /// Bytes the peer currently accepts without further acknowledgment.
    fn available_send_window(&self) -> usize;

    /// Grant the peer `len` bytes of receive window.
    ///
    /// Data that is never acknowledged stalls the connection.
    fn acknowledge_received(&self, len: usize);

    /// Raise scheduling priority for this connection, if the stack has such a thing.
    fn set_priority_max(&self) {}

    /// Stop delivering events for this connection.
    fn detach(&self);

    /// Close the connection. Queued outbound bytes are still sent.
    fn close(&self);

    /// Printable peer description for logs.
    fn peer(&self) -> String;
}

/// An ordered chain of received segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteChain {
    segments: VecDeque<Bytes>,
}

impl ByteChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate `other` onto the tail of this chain.
    pub fn append(&mut self, mut other: ByteChain) {
        self.segments.append(&mut other.segments);
    }

    pub fn push(&mut self, segment: Bytes) {
        self.segments.push_back(segment);
    }

    /// Take the first segment off the chain.
    pub fn pop(&mut self) -> Option<Bytes> {
        self.segments.pop_front()
    }

    /// Put a segment back at the front of the chain.
    pub(crate) fn push_front(&mut self, segment: Bytes) {
        self.segments.push_front(segment);
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl From<Bytes> for ByteChain {
    fn from(segment: Bytes) -> Self {
        let mut chain = ByteChain::new();
        chain.push(segment);
        chain
    }
}

impl FromIterator<Bytes> for ByteChain {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("connection reset by peer")]
    Reset,

    #[error("connection aborted")]
    Aborted,

    #[error("socket is closed")]
    Closed,

    #[error("send of {len} bytes exceeds window of {window}")]
    WindowExceeded { len: usize, window: usize },

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionReset => SocketError::Reset,
            std::io::ErrorKind::ConnectionAborted => SocketError::Aborted,
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => SocketError::Closed,
            _ => SocketError::Io(e.to_string()),
        }
    }
}
