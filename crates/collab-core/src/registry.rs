//! Connection registry
//!
//! Tracks live transport connections and which room each belongs to. The
//! registry owns the only copy of each connection's outbound sender: removing
//! the entry drops the sender, which ends the writer task and closes the
//! socket.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::Outbound;
use crate::room::RoomId;
use crate::UserId;

/// Connection identifier, generated on transport accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What an unregistered connection leaves behind, for room cleanup.
#[derive(Debug, Clone)]
pub struct Departure {
    pub room: Option<RoomId>,
    pub user: Option<UserId>,
}

struct ConnectionEntry {
    sender: mpsc::Sender<Outbound>,
    room: Option<RoomId>,
    user: Option<UserId>,
    last_seen: Instant,
}

/// Registry of live connections.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly accepted connection, unassigned to any room.
    pub fn register(&self, sender: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.write().insert(
            id,
            ConnectionEntry {
                sender,
                room: None,
                user: None,
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Remove a connection, returning its room/user for leave processing.
    ///
    /// Returns `None` for unknown ids, so concurrent close and error events
    /// on the same connection run the leave path exactly once.
    pub fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        self.connections.write().remove(&id).map(|entry| Departure {
            room: entry.room,
            user: entry.user,
        })
    }

    /// Room the connection currently belongs to, if any.
    pub fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.connections.read().get(&id)?.room.clone()
    }

    /// User identity declared by the connection, if any.
    pub fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.read().get(&id)?.user.clone()
    }

    /// Outbound sender for targeted frames.
    pub fn sender(&self, id: ConnectionId) -> Option<mpsc::Sender<Outbound>> {
        Some(self.connections.read().get(&id)?.sender.clone())
    }

    /// Record the room/user a connection joined as.
    pub fn assign_room(&self, id: ConnectionId, room: RoomId, user: UserId) {
        if let Some(entry) = self.connections.write().get_mut(&id) {
            entry.room = Some(room);
            entry.user = Some(user);
        }
    }

    /// Clear the room assignment, returning the room it had.
    pub fn clear_room(&self, id: ConnectionId) -> Option<RoomId> {
        self.connections.write().get_mut(&id)?.room.take()
    }

    /// Mark the connection as alive.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(entry) = self.connections.write().get_mut(&id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Connections silent for longer than `threshold`.
    pub fn idle_connections(&self, threshold: Duration) -> Vec<ConnectionId> {
        let connections = self.connections.read();
        connections
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > threshold)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> mpsc::Sender<Outbound> {
        mpsc::channel(8).0
    }

    #[test]
    fn register_and_lookup() {
        let registry = Registry::new();
        let id = registry.register(sender());

        assert_eq!(registry.len(), 1);
        assert!(registry.room_of(id).is_none());

        registry.assign_room(id, RoomId::from("abc"), UserId::from("u1"));
        assert_eq!(registry.room_of(id).unwrap().as_str(), "abc");
        assert_eq!(registry.user_of(id).unwrap().as_str(), "u1");
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::new();
        let id = registry.register(sender());
        registry.assign_room(id, RoomId::from("abc"), UserId::from("u1"));

        let departure = registry.unregister(id).unwrap();
        assert_eq!(departure.room.unwrap().as_str(), "abc");

        // Second teardown (concurrent close + error) sees nothing.
        assert!(registry.unregister(id).is_none());
        assert!(registry.room_of(id).is_none());
    }

    #[test]
    fn idle_connections_respect_threshold() {
        let registry = Registry::new();
        let id = registry.register(sender());

        assert!(registry.idle_connections(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.idle_connections(Duration::ZERO), vec![id]);

        registry.touch(id);
        assert!(registry.idle_connections(Duration::from_secs(60)).is_empty());
    }
}
