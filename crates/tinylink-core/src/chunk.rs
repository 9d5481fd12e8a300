//! Chunk queue - the ordered byte chunks waiting to be read.
//!
//! Every chunk carries the identifier of the connection it arrived on.
//! Chunks are kept in global arrival order: two connections writing at
//! the same time interleave at chunk granularity, never inside a chunk.
//!
//! The queue never holds an empty chunk. A chunk that is fully consumed
//! is removed; a partially consumed one keeps a narrower view of the same
//! buffer (`Bytes` is an offset + length into shared storage, so nothing
//! is copied or mutated in place).

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

/// Process-unique connection identifier, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of received data, tagged with its originating connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub connection: ConnectionId,
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// FIFO of tagged chunks. Insert at the tail, remove at the head.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    queued_bytes: usize,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy of `bytes` tagged with `connection`.
    pub fn enqueue(&mut self, connection: ConnectionId, bytes: &[u8]) {
        self.enqueue_owned(connection, Bytes::copy_from_slice(bytes));
    }

    /// Append an already-owned buffer without copying it.
    ///
    /// Empty buffers are dropped on the floor.
    pub fn enqueue_owned(&mut self, connection: ConnectionId, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.queued_bytes += data.len();
        self.chunks.push_back(Chunk { connection, data });
    }

    /// Remove and return the head chunk.
    pub fn dequeue_head(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.queued_bytes -= chunk.len();
        Some(chunk)
    }

    pub fn peek_head(&self) -> Option<&Chunk> {
        self.chunks.front()
    }

    /// Replace the head chunk's buffer, keeping its connection tag.
    ///
    /// An empty replacement removes the head instead.
    pub fn replace_head_remainder(&mut self, data: Bytes) {
        if data.is_empty() {
            self.dequeue_head();
            return;
        }
        if let Some(head) = self.chunks.front_mut() {
            self.queued_bytes = self.queued_bytes - head.data.len() + data.len();
            head.data = data;
        }
    }

    /// Split `n` bytes off the front of the head chunk.
    ///
    /// Takes the whole chunk when `n` covers it. Returns `None` on an empty queue.
    pub fn take_from_head(&mut self, n: usize) -> Option<Chunk> {
        let head = self.chunks.front_mut()?;
        if n >= head.data.len() {
            return self.dequeue_head();
        }
        let data = head.data.split_to(n);
        self.queued_bytes -= n;
        Some(Chunk {
            connection: head.connection,
            data,
        })
    }

    /// Drop every chunk tagged with `connection`. Returns the number of bytes discarded.
    pub fn purge(&mut self, connection: ConnectionId) -> usize {
        let before = self.queued_bytes;
        self.chunks.retain(|c| c.connection != connection);
        self.queued_bytes = self.chunks.iter().map(Chunk::len).sum();
        before - self.queued_bytes
    }

    /// Drop everything. Returns the number of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queued_bytes;
        self.chunks.clear();
        self.queued_bytes = 0;
        discarded
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes across all queued chunks.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}
