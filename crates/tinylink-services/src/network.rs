//! Network - the shared context tying the chunk queue, the instance
//! registry, and the pump together.
//!
//! The socket layer reports events through the `on_*` methods. The
//! application reads through [`crate::stream`] and writes through
//! [`crate::writer`], both implemented as further `impl Network` blocks.
//!
//! Lock order: the queue mutex first, then a registry guard. Registry
//! guards are always released before a connection is unregistered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, OnceCell};

use tinylink_core::config::{CloseScope, TinylinkConfig};
use tinylink_core::{ChunkQueue, ConnectionId};

use crate::connection::{Connection, ConnectionState, Transition};
use crate::pump::Pump;
use crate::registry::InstanceRegistry;
use crate::socket::{ByteChain, SocketError, SocketHandle};

/// Buffering policy for one [`Network`].
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub max_connections: usize,
    /// 0 = unbounded.
    pub queue_high_water: usize,
    pub close_scope: CloseScope,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_connections: 16,
            queue_high_water: 0,
            close_scope: CloseScope::Connection,
        }
    }
}

impl From<&TinylinkConfig> for NetworkSettings {
    fn from(config: &TinylinkConfig) -> Self {
        Self {
            max_connections: config.network.max_connections,
            queue_high_water: config.buffering.queue_high_water,
            close_scope: config.buffering.close_scope,
        }
    }
}

#[derive(Clone)]
pub struct Network {
    pub(crate) queue: Arc<Mutex<ChunkQueue>>,
    pub(crate) registry: InstanceRegistry,
    /// Signalled whenever chunks are added to the queue.
    pub(crate) arrivals: Arc<Notify>,
    pump: Arc<OnceCell<Pump>>,
    next_id: Arc<AtomicU32>,
    settings: Arc<NetworkSettings>,
}

impl Network {
    pub fn new(settings: NetworkSettings) -> Self {
        Self {
            queue: Arc::new(Mutex::new(ChunkQueue::new())),
            registry: InstanceRegistry::new(),
            arrivals: Arc::new(Notify::new()),
            pump: Arc::new(OnceCell::new()),
            next_id: Arc::new(AtomicU32::new(1)),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Register the pump. Only one may ever be set.
    pub fn set_pump(&self, pump: Pump) -> Result<(), NetError> {
        self.pump.set(pump).map_err(|_| NetError::PumpAlreadySet)
    }

    pub(crate) fn pump(&self) -> Option<&Pump> {
        self.pump.get()
    }

    // ── Socket-layer events ───────────────────────────────────────────────────

    /// A connection was accepted. Returns its new identifier.
    pub fn on_accept(&self, socket: Arc<dyn SocketHandle>) -> Result<ConnectionId, NetError> {
        let limit = self.settings.max_connections;
        if self.registry.len() >= limit {
            tracing::warn!(peer = %socket.peer(), limit, "connection limit reached, refusing");
            return Err(NetError::TooManyConnections(limit));
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        socket.set_priority_max();
        tracing::info!(connection = %id, peer = %socket.peer(), "client connected");
        self.registry.register(Connection::new(id, socket));
        Ok(id)
    }

    /// Data arrived on a connection.
    ///
    /// `NoSuchConnection` means nobody took the chain; the caller should
    /// acknowledge and drop it.
    pub async fn on_data(&self, id: ConnectionId, chain: ByteChain) -> Result<(), NetError> {
        let mut queue = self.queue.lock().await;
        let before = queue.queued_bytes();
        let transition = {
            let mut conn = self
                .registry
                .lookup_mut(id)
                .ok_or(NetError::NoSuchConnection(id))?;
            let transition = conn.on_data(chain, &mut queue, self.settings.queue_high_water);
            tracing::debug!(connection = %id, state = ?conn.state(), "data event");
            transition
        };
        if queue.queued_bytes() > before {
            self.arrivals.notify_waiters();
        }
        self.apply(id, transition, &mut queue);
        Ok(())
    }

    /// The peer closed its side of the connection.
    pub async fn on_remote_close(&self, id: ConnectionId) -> Result<(), NetError> {
        let mut queue = self.queue.lock().await;
        let before = queue.queued_bytes();
        let transition = self
            .registry
            .lookup_mut(id)
            .ok_or(NetError::NoSuchConnection(id))?
            .on_remote_close(&mut queue, self.settings.queue_high_water);
        tracing::debug!(connection = %id, ?transition, "remote close");
        if queue.queued_bytes() > before {
            self.arrivals.notify_waiters();
        }
        self.apply(id, transition, &mut queue);
        Ok(())
    }

    /// The socket layer gave up on a connection.
    ///
    /// The socket is already gone, so it is neither detached nor closed.
    pub async fn on_error(&self, id: ConnectionId, error: SocketError) -> Result<(), NetError> {
        let mut queue = self.queue.lock().await;
        let mut conn = self
            .registry
            .unregister(id)
            .ok_or(NetError::NoSuchConnection(id))?;
        let dropped = conn.discard_pending();
        let purged = queue.purge(id);
        conn.credit().notify_waiters();
        // The purge may have taken the queue below the high-water mark.
        self.resume_pending(&mut queue);
        tracing::warn!(
            connection = %id,
            error = %error,
            dropped,
            purged,
            "socket error, connection released"
        );
        Ok(())
    }

    /// The peer acknowledged `len` sent bytes; the send window may have grown.
    pub fn on_sent(&self, id: ConnectionId, len: usize) -> Result<(), NetError> {
        let conn = self
            .registry
            .lookup(id)
            .ok_or(NetError::NoSuchConnection(id))?;
        tracing::trace!(connection = %id, len, "sent acknowledged");
        conn.credit().notify_waiters();
        Ok(())
    }

    // ── Application API ───────────────────────────────────────────────────────

    /// Close a connection by identifier.
    pub async fn close_connection(&self, id: ConnectionId) -> Result<(), NetError> {
        let mut queue = self.queue.lock().await;
        tracing::debug!(connection = %id, "removing client instance");
        self.teardown(id, &mut queue)
            .map(|_| ())
            .ok_or(NetError::NoSuchConnection(id))
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.registry.lookup(id).map(|conn| conn.state())
    }

    /// Bytes received on `id` but still held back from the queue.
    pub fn pending_len(&self, id: ConnectionId) -> Option<usize> {
        self.registry.lookup(id).map(|conn| conn.pending_len())
    }

    pub async fn queued_bytes(&self) -> usize {
        self.queue.lock().await.queued_bytes()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    pub(crate) fn socket_of(&self, id: ConnectionId) -> Option<(Arc<dyn SocketHandle>, Arc<Notify>)> {
        self.registry
            .lookup(id)
            .map(|conn| (conn.socket().clone(), conn.credit().clone()))
    }

    fn apply(&self, id: ConnectionId, transition: Transition, queue: &mut ChunkQueue) {
        if transition == Transition::Close {
            self.teardown(id, queue);
        }
    }

    /// Resume drains that stopped at the high-water mark.
    pub(crate) fn resume_pending(&self, queue: &mut ChunkQueue) {
        let high_water = self.settings.queue_high_water;
        for id in self.registry.pending_ids() {
            if high_water > 0 && queue.queued_bytes() >= high_water {
                break;
            }
            let before = queue.queued_bytes();
            let transition = match self.registry.lookup_mut(id) {
                Some(mut conn) => conn.resume(queue, high_water),
                None => continue,
            };
            if queue.queued_bytes() > before {
                self.arrivals.notify_waiters();
            }
            self.apply(id, transition, queue);
        }
    }

    /// Unregister, purge queued data, detach, and close. `None` if already gone.
    fn teardown(&self, id: ConnectionId, queue: &mut ChunkQueue) -> Option<Connection> {
        let mut conn = self.registry.unregister(id)?;
        let dropped = conn.discard_pending();
        let purged = match self.settings.close_scope {
            CloseScope::Connection => queue.purge(id),
            CloseScope::All => queue.clear(),
        };
        conn.socket().detach();
        conn.socket().close();
        conn.credit().notify_waiters();
        self.resume_pending(queue);
        tracing::info!(
            connection = %id,
            peer = %conn.socket().peer(),
            purged,
            dropped,
            "connection closed"
        );
        Some(conn)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("no such connection: {0}")]
    NoSuchConnection(ConnectionId),

    #[error("connection limit of {0} reached")]
    TooManyConnections(usize),

    #[error("a pump is already registered")]
    PumpAlreadySet,
}
