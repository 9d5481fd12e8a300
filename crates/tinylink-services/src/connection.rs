//! Per-connection state machine.
//!
//! States:
//!   Accepted  - established, nothing received yet
//!   Receiving - normal operation
//!   Closing   - remote side closed; waiting for the pending chain to drain
//!
//! Received data is held as a pending chain until it is drained into the
//! chunk queue. Draining acknowledges each transferred segment to the
//! socket layer, which is what gives the peer more receive window. When
//! the queue is over its high-water mark draining stops early and the
//! rest of the chain stays pending until a read makes room.
//!
//! Methods here never remove the connection themselves. They return a
//! [`Transition`] and the network performs the teardown.

use std::sync::Arc;

use tokio::sync::Notify;

use tinylink_core::{ChunkQueue, ConnectionId};

use crate::socket::{ByteChain, SocketHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Receiving,
    Closing,
}

/// What the network must do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    Stay,
    Close,
}

pub struct Connection {
    pub id: ConnectionId,
    state: ConnectionState,
    pending: Option<ByteChain>,
    /// Drains cut short by the high-water mark.
    retries: u32,
    socket: Arc<dyn SocketHandle>,
    /// Signalled when the send window may have grown or the connection went away.
    credit: Arc<Notify>,
}

impl Connection {
    pub fn new(id: ConnectionId, socket: Arc<dyn SocketHandle>) -> Self {
        Self {
            id,
            state: ConnectionState::Accepted,
            pending: None,
            retries: 0,
            socket,
            credit: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn socket(&self) -> &Arc<dyn SocketHandle> {
        &self.socket
    }

    pub fn credit(&self) -> &Arc<Notify> {
        &self.credit
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes received but not yet moved into the queue.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, ByteChain::total_len)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// New data arrived from the socket layer.
    pub fn on_data(&mut self, chain: ByteChain, queue: &mut ChunkQueue, high_water: usize) -> Transition {
        match self.state {
            ConnectionState::Accepted => {
                self.state = ConnectionState::Receiving;
                self.pending = Some(chain);
                self.drain(queue, high_water);
                Transition::Stay
            }
            ConnectionState::Receiving => {
                match self.pending.as_mut() {
                    // A drain is already under way; queue behind it.
                    Some(pending) => {
                        tracing::trace!(
                            connection = %self.id,
                            len = chain.total_len(),
                            "appending to pending chain"
                        );
                        pending.append(chain);
                    }
                    None => {
                        self.pending = Some(chain);
                        self.drain(queue, high_water);
                    }
                }
                Transition::Stay
            }
            ConnectionState::Closing => {
                let len = chain.total_len();
                tracing::warn!(
                    connection = %self.id,
                    len,
                    "data after remote close, discarding"
                );
                self.socket.acknowledge_received(len);
                self.pending = None;
                Transition::Close
            }
        }
    }

    /// The peer closed its side.
    pub fn on_remote_close(&mut self, queue: &mut ChunkQueue, high_water: usize) -> Transition {
        self.state = ConnectionState::Closing;
        if self.pending.is_none() {
            return Transition::Close;
        }
        self.drain(queue, high_water);
        self.after_drain()
    }

    /// Continue a drain cut short by the high-water mark.
    pub fn resume(&mut self, queue: &mut ChunkQueue, high_water: usize) -> Transition {
        if self.pending.is_none() {
            return Transition::Stay;
        }
        self.drain(queue, high_water);
        self.after_drain()
    }

    /// Drop any pending chain without acknowledging it.
    pub fn discard_pending(&mut self) -> usize {
        self.pending.take().map_or(0, |chain| chain.total_len())
    }

    fn after_drain(&self) -> Transition {
        if self.state == ConnectionState::Closing && self.pending.is_none() {
            Transition::Close
        } else {
            Transition::Stay
        }
    }

    /// Move pending segments into the queue, acknowledging each one.
    ///
    /// Returns the number of bytes transferred.
    pub fn drain(&mut self, queue: &mut ChunkQueue, high_water: usize) -> usize {
        let Some(mut chain) = self.pending.take() else {
            return 0;
        };
        let mut moved = 0;
        while let Some(segment) = chain.pop() {
            if high_water > 0 && queue.queued_bytes() >= high_water {
                chain.push_front(segment);
                self.retries += 1;
                tracing::debug!(
                    connection = %self.id,
                    queued = queue.queued_bytes(),
                    pending = chain.total_len(),
                    "queue over high water, deferring drain"
                );
                break;
            }
            let len = segment.len();
            tracing::trace!(
                connection = %self.id,
                len,
                preview = hex::encode(&segment[..len.min(16)]),
                "segment queued"
            );
            queue.enqueue_owned(self.id, segment);
            self.socket.acknowledge_received(len);
            moved += len;
        }
        if !chain.is_empty() {
            self.pending = Some(chain);
        }
        moved
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_len", &self.pending_len())
            .field("retries", &self.retries)
            .field("peer", &self.socket.peer())
            .finish()
    }
}
