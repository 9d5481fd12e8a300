//! Stream framing over a [`ChunkQueue`].
//!
//! Two read modes:
//!   line  - bytes up to the next CRLF in the head chunk
//!   exact - exactly N bytes, spanning as many chunks as needed
//!
//! These functions never wait. They return `None` (or report
//! incompleteness) when the queue runs dry; suspending until more data
//! arrives is the caller's job.
//!
//! A line is never reassembled across chunks. If the head chunk has no
//! terminator the whole chunk is the line. Senders of line-oriented
//! commands write one command per segment, which keeps this sound.

use bytes::{Bytes, BytesMut};

use crate::chunk::{ChunkQueue, ConnectionId};

const CRLF: &[u8] = b"\r\n";

/// One line taken from the queue, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub connection: ConnectionId,
    pub data: Bytes,
}

/// Where the next line sits inside a chunk.
struct LineBounds {
    start: usize,
    end: usize,
    /// Offset just past the terminator, if one was found.
    resume: Option<usize>,
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}

fn line_bounds(data: &[u8]) -> LineBounds {
    // A chunk opening with CRLF is the tail of the previous command.
    let start = if data.starts_with(CRLF) { CRLF.len() } else { 0 };
    match find_crlf(&data[start..]) {
        Some(pos) => LineBounds {
            start,
            end: start + pos,
            resume: Some(start + pos + CRLF.len()),
        },
        None => LineBounds {
            start,
            end: data.len(),
            resume: None,
        },
    }
}

/// Length of the line [`take_line`] would return, without consuming it.
pub fn peek_line_len(queue: &ChunkQueue) -> Option<usize> {
    let head = queue.peek_head()?;
    let bounds = line_bounds(&head.data);
    Some(bounds.end - bounds.start)
}

/// Take the next line from the head chunk.
pub fn take_line(queue: &mut ChunkQueue) -> Option<Line> {
    let head = queue.peek_head()?;
    let connection = head.connection;
    let data = head.data.clone();
    let bounds = line_bounds(&data);
    let line = data.slice(bounds.start..bounds.end);

    match bounds.resume {
        // An empty remainder drops the chunk.
        Some(resume) => queue.replace_head_remainder(data.slice(resume..)),
        None => {
            queue.dequeue_head();
        }
    }

    Some(Line {
        connection,
        data: line,
    })
}

/// Incremental fixed-length read.
///
/// Feed it the queue with [`ExactRead::fill`] until it reports
/// completion. The connection id reported is the one on the first chunk
/// consumed; later chunks are not checked against it.
#[derive(Debug)]
pub struct ExactRead {
    want: usize,
    connection: Option<ConnectionId>,
    whole: Option<Bytes>,
    buf: BytesMut,
}

impl ExactRead {
    pub fn new(len: usize) -> Self {
        Self {
            want: len,
            connection: None,
            whole: None,
            buf: BytesMut::new(),
        }
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> usize {
        let have = self.whole.as_ref().map_or(self.buf.len(), Bytes::len);
        self.want - have
    }

    pub fn is_complete(&self) -> bool {
        self.connection.is_some() && self.remaining() == 0
    }

    /// Move as many bytes as possible out of `queue`.
    ///
    /// Returns true once the read is complete.
    pub fn fill(&mut self, queue: &mut ChunkQueue) -> bool {
        while !self.is_complete() {
            let Some(head) = queue.peek_head() else {
                break;
            };
            if self.connection.is_none() {
                self.connection = Some(head.connection);
                // Head alone covers the read: hand out a view, no copy.
                if head.len() >= self.want {
                    self.whole = queue.take_from_head(self.want).map(|c| c.data);
                    break;
                }
            }
            let missing = self.remaining();
            if let Some(chunk) = queue.take_from_head(missing) {
                self.buf.extend_from_slice(&chunk.data);
            }
        }
        self.is_complete()
    }

    /// Take the assembled bytes and the first chunk's connection, once complete.
    ///
    /// Leaves the read empty; a second call returns `None`.
    pub fn take_complete(&mut self) -> Option<(ConnectionId, Bytes)> {
        if !self.is_complete() {
            return None;
        }
        let connection = self.connection.take()?;
        let data = match self.whole.take() {
            Some(whole) => whole,
            None => self.buf.split().freeze(),
        };
        self.want = 0;
        Some((connection, data))
    }

    pub fn finish(mut self) -> Option<(ConnectionId, Bytes)> {
        self.take_complete()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("line of {needed} bytes (with NUL) does not fit in {capacity}-byte buffer")]
    BufferTooSmall { needed: usize, capacity: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
