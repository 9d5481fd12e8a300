//! Stream reads - line and fixed-length reads that wait for data.
//!
//! Reads suspend while the queue is empty and never time out. Every read
//! that frees queue space also resumes drains held back by the
//! high-water mark.

use bytes::Bytes;

use tinylink_core::reader::{peek_line_len, take_line, ExactRead, ReadError};
use tinylink_core::ConnectionId;

use crate::network::Network;
use crate::pump::suspend;

impl Network {
    /// Next line from the queue, CRLF stripped, with its originating connection.
    pub async fn read_line(&self) -> (ConnectionId, Bytes) {
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut queue = self.queue.lock().await;
                if let Some(line) = take_line(&mut queue) {
                    self.resume_pending(&mut queue);
                    tracing::trace!(
                        connection = %line.connection,
                        len = line.data.len(),
                        "line read"
                    );
                    return (line.connection, line.data);
                }
                self.resume_pending(&mut queue);
                if !queue.is_empty() {
                    continue;
                }
            }
            suspend(self.pump(), notified).await;
        }
    }

    /// Read the next line into `buf`, followed by a NUL byte.
    ///
    /// Returns the originating connection and the line length (without
    /// the NUL). A line that does not fit is left queued.
    pub async fn read_line_into(&self, buf: &mut [u8]) -> Result<(ConnectionId, usize), ReadError> {
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut queue = self.queue.lock().await;
                if let Some(len) = peek_line_len(&queue) {
                    if len + 1 > buf.len() {
                        return Err(ReadError::BufferTooSmall {
                            needed: len + 1,
                            capacity: buf.len(),
                        });
                    }
                    if let Some(line) = take_line(&mut queue) {
                        self.resume_pending(&mut queue);
                        buf[..len].copy_from_slice(&line.data);
                        buf[len] = 0;
                        return Ok((line.connection, len));
                    }
                }
                self.resume_pending(&mut queue);
                if !queue.is_empty() {
                    continue;
                }
            }
            suspend(self.pump(), notified).await;
        }
    }

    /// Read exactly `len` bytes, spanning chunks as needed.
    ///
    /// The connection returned is that of the first chunk consumed.
    ///
    /// # Cancel safety
    ///
    /// Not cancel safe. Bytes taken from the queue before the future is
    /// dropped are lost.
    pub async fn read_exact(&self, len: usize) -> (ConnectionId, Bytes) {
        let mut read = ExactRead::new(len);
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut queue = self.queue.lock().await;
                read.fill(&mut queue);
                self.resume_pending(&mut queue);
                if let Some(done) = read.take_complete() {
                    return done;
                }
                // Resumed drains may already have refilled the queue.
                if !queue.is_empty() {
                    continue;
                }
            }
            suspend(self.pump(), notified).await;
        }
    }

    /// Fill `buf` completely. Returns the first chunk's connection.
    pub async fn read_exact_into(&self, buf: &mut [u8]) -> ConnectionId {
        let (id, data) = self.read_exact(buf.len()).await;
        buf.copy_from_slice(&data);
        id
    }
}
