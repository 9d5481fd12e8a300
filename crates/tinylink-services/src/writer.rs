//! Flow-controlled writes.
//!
//! A write never hands the socket more than its current send window. When
//! the window is closed the writer suspends until the peer acknowledges
//! earlier data ([`Network::on_sent`]) or the connection goes away.

use std::sync::Arc;

use tokio::sync::Notify;

use tinylink_core::ConnectionId;

use crate::network::Network;
use crate::pump::suspend;
use crate::socket::{SendFlags, SocketError, SocketHandle};

impl Network {
    /// Send all of `data` to connection `id`.
    ///
    /// Returns once every byte has been handed to the socket and the send
    /// window has reopened.
    pub async fn write(&self, id: ConnectionId, data: &[u8]) -> Result<(), WriteError> {
        let (socket, credit) = self.socket_of(id).ok_or(WriteError::NoSuchConnection(id))?;

        let mut remaining = data;
        while !remaining.is_empty() {
            let window = self.wait_for_window(id, &socket, &credit).await?;
            let len = window.min(remaining.len());
            let flags = SendFlags {
                copy: true,
                more: len < remaining.len(),
            };
            socket.send(&remaining[..len], flags)?;
            socket.flush()?;
            tracing::trace!(connection = %id, len, window, "sent");
            remaining = &remaining[len..];
        }

        // Let the stack catch up before the caller queues more.
        self.wait_for_window(id, &socket, &credit).await?;
        Ok(())
    }

    async fn wait_for_window(
        &self,
        id: ConnectionId,
        socket: &Arc<dyn SocketHandle>,
        credit: &Notify,
    ) -> Result<usize, WriteError> {
        loop {
            let notified = credit.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.registry.contains(id) {
                return Err(WriteError::ConnectionClosed(id));
            }
            let window = socket.available_send_window();
            if window > 0 {
                return Ok(window);
            }
            tracing::trace!(connection = %id, "send window closed, waiting");
            suspend(self.pump(), notified).await;
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("no such connection: {0}")]
    NoSuchConnection(ConnectionId),

    #[error("connection {0} closed during write")]
    ConnectionClosed(ConnectionId),

    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
}
