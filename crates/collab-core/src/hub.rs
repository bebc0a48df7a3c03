//! Composition root
//!
//! Ties the connection registry, room store, update relay and presence
//! coordinator together and owns the one-and-only disconnect path. Transport
//! code talks to the `Hub`; the components below it never call back into the
//! transport.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::CollabConfig;
use crate::error::CollabError;
use crate::presence::{PresenceCoordinator, PresenceUpdate};
use crate::protocol::{Outbound, ServerMessage};
use crate::registry::{ConnectionId, Registry};
use crate::relay::Relay;
use crate::room::{JoinProfile, RoomId, RoomSnapshot, RoomStore, RoomSummary};
use collab_sync::SyncEngine;

pub struct Hub<E: SyncEngine> {
    config: CollabConfig,
    registry: Arc<Registry>,
    rooms: Arc<RoomStore<E>>,
    relay: Relay<E>,
    presence: PresenceCoordinator<E>,
}

impl<E: SyncEngine> Hub<E> {
    pub fn new(config: CollabConfig, engine: E) -> Self {
        let registry = Arc::new(Registry::new());
        let rooms = Arc::new(RoomStore::new(engine, &config));
        Self {
            relay: Relay::new(rooms.clone()),
            presence: PresenceCoordinator::new(rooms.clone()),
            registry,
            rooms,
            config,
        }
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a freshly accepted transport connection.
    pub fn register(&self, sender: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = self.registry.register(sender);
        tracing::debug!(conn = %id, connections = self.registry.len(), "connection registered");
        id
    }

    /// Join a room on behalf of a connection. A connection already assigned
    /// to a different room moves over, leaving the old room only once the
    /// new join has succeeded: a refused join must not disturb the
    /// membership the connection already holds.
    pub fn join(
        &self,
        conn: ConnectionId,
        room_id: RoomId,
        profile: JoinProfile,
    ) -> Result<RoomSnapshot, CollabError> {
        let sender = self
            .registry
            .sender(conn)
            .ok_or_else(|| CollabError::Transport("unknown connection".to_string()))?;

        let previous = self.registry.room_of(conn).filter(|current| *current != room_id);

        let user_id = profile.user_id.clone();
        let (snapshot, mut slow) = self.rooms.join(&room_id, conn, profile, sender)?;
        if let Some(previous) = previous {
            slow.extend(self.rooms.leave(&previous, conn));
        }
        self.registry.assign_room(conn, room_id, user_id);
        self.evict(slow);
        Ok(snapshot)
    }

    /// Voluntary leave of whatever room the connection is in.
    pub fn leave_current(&self, conn: ConnectionId) {
        if let Some(room) = self.registry.clear_room(conn) {
            let slow = self.rooms.leave(&room, conn);
            self.evict(slow);
        }
    }

    /// Relay an opaque update buffer from a connection to its room.
    pub fn apply_update(&self, conn: ConnectionId, update: Vec<u8>) -> Result<(), CollabError> {
        let room = self.registry.room_of(conn).ok_or(CollabError::NotInRoom)?;
        let slow = self.relay.apply_and_broadcast(&room, conn, update)?;
        self.evict(slow);
        Ok(())
    }

    /// Relay a file tree operation from a connection to its room.
    pub fn file_operation(
        &self,
        conn: ConnectionId,
        payload: serde_json::Value,
    ) -> Result<(), CollabError> {
        let room = self.registry.room_of(conn).ok_or(CollabError::NotInRoom)?;
        let slow = self.relay.relay_file_operation(&room, conn, payload)?;
        self.evict(slow);
        Ok(())
    }

    /// Upsert presence fields for the user behind a connection.
    pub fn update_presence(
        &self,
        conn: ConnectionId,
        update: PresenceUpdate,
    ) -> Result<(), CollabError> {
        let room = self.registry.room_of(conn).ok_or(CollabError::NotInRoom)?;
        let slow = self.presence.set_presence(&room, conn, update)?;
        self.evict(slow);
        Ok(())
    }

    /// Read-only room metadata for external collaborators.
    pub fn room_summary(&self, room_id: &RoomId) -> Option<RoomSummary> {
        self.rooms.summary(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue an error report to a single connection.
    pub fn notify_error(&self, conn: ConnectionId, error: &CollabError) {
        if let Some(sender) = self.registry.sender(conn) {
            let _ = sender.try_send(Outbound::Control(ServerMessage::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            }));
        }
    }

    /// Tear a connection down: exactly one leave per connection, no matter
    /// how many close/error/idle events race. Dropping the registry entry
    /// drops the outbound sender, which ends the writer task and closes the
    /// socket.
    pub fn disconnect(&self, conn: ConnectionId) {
        let Some(departure) = self.registry.unregister(conn) else {
            return;
        };
        if let Some(room) = departure.room {
            let slow = self.rooms.leave(&room, conn);
            self.evict(slow);
        }
        tracing::debug!(conn = %conn, connections = self.registry.len(), "connection closed");
    }

    /// Connections idle past the configured threshold.
    pub fn idle_connections(&self) -> Vec<ConnectionId> {
        self.registry.idle_connections(self.config.idle_timeout())
    }

    fn evict(&self, slow: Vec<ConnectionId>) {
        for conn in slow {
            tracing::warn!(conn = %conn, "disconnecting slow peer (send queue overflow)");
            self.disconnect(conn);
        }
    }
}
