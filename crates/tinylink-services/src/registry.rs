//! Instance registry - live connections keyed by identifier.

use std::sync::Arc;

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;

use tinylink_core::ConnectionId;

use crate::connection::Connection;

/// The connection table - shared between event handlers, readers, and writers.
///
/// Never hold a returned guard across an `.await`, and never call
/// [`InstanceRegistry::unregister`] while holding one.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Replaces any stale entry with the same id.
    pub fn register(&self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Ref<'_, ConnectionId, Connection>> {
        self.connections.get(&id)
    }

    pub fn lookup_mut(&self, id: ConnectionId) -> Option<RefMut<'_, ConnectionId, Connection>> {
        self.connections.get_mut(&id)
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Identifiers of connections holding an undrained chain.
    pub fn pending_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| entry.value().has_pending())
            .map(|entry| *entry.key())
            .collect();
        // Oldest connection first, so resumption order is stable.
        ids.sort_unstable();
        ids
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
