//! Room store and lifecycle
//!
//! A room is created lazily on first join and evicted the instant its member
//! set empties; there is no grace period and no orphan retention. All mutable
//! room state (document, member set, presence map) lives behind one mutex per
//! room, which is the room's ordering point: joins, leaves, merges and
//! broadcast enqueues for the same room are strictly serialized, while
//! different rooms never contend.
//!
//! The lock is only ever held across in-memory work. Fan-out uses each
//! member's bounded queue via `try_send`, so a slow peer's socket can never
//! stall the room; an overflowing peer is reported to the caller for
//! eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::CollabConfig;
use crate::error::CollabError;
use crate::presence::{PresenceEvent, PresenceRecord};
use crate::protocol::{Outbound, ServerMessage};
use crate::registry::ConnectionId;
use crate::UserId;
use collab_sync::SyncEngine;

/// Room identifier: an arbitrary, client-supplied key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity a connection declares when joining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinProfile {
    pub user_id: UserId,
    pub name: String,
    pub color: Option<String>,
}

/// Full document state handed to a newly joined connection.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// Serialized document state; initializes a client without replaying
    /// history.
    pub state: Vec<u8>,
    /// Presence roster at the snapshot point.
    pub presence: Vec<PresenceRecord>,
}

/// Read-only membership summary for external metadata queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub member_count: usize,
    pub users: Vec<UserId>,
}

struct Member {
    user_id: UserId,
    sender: mpsc::Sender<Outbound>,
}

/// Mutable state of one active room. Access only through the room's lock.
pub struct RoomState<D> {
    doc: D,
    members: HashMap<ConnectionId, Member>,
    presence: HashMap<UserId, PresenceRecord>,
    /// Set under the lock when the last member leaves, so a join racing the
    /// eviction retries against a fresh room instead of a zombie.
    evicted: bool,
}

impl<D> RoomState<D> {
    fn new(doc: D) -> Self {
        Self {
            doc,
            members: HashMap::new(),
            presence: HashMap::new(),
            evicted: false,
        }
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn is_member(&self, conn: ConnectionId) -> bool {
        self.members.contains_key(&conn)
    }

    pub(crate) fn member_user(&self, conn: ConnectionId) -> Option<UserId> {
        self.members.get(&conn).map(|m| m.user_id.clone())
    }

    pub(crate) fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn doc_mut(&mut self) -> &mut D {
        &mut self.doc
    }

    pub(crate) fn presence_mut(&mut self, user: &UserId) -> Option<&mut PresenceRecord> {
        self.presence.get_mut(user)
    }

    fn roster(&self) -> Vec<PresenceRecord> {
        self.presence.values().cloned().collect()
    }

    fn user_has_other_connection(&self, user: &UserId, except: ConnectionId) -> bool {
        self.members
            .iter()
            .any(|(id, m)| *id != except && m.user_id == *user)
    }

    /// Queue a frame to every member except `skip`, returning the members
    /// whose queues overflowed.
    pub(crate) fn broadcast(
        &self,
        skip: Option<ConnectionId>,
        frame: &Outbound,
    ) -> Vec<ConnectionId> {
        let mut slow = Vec::new();
        for (id, member) in &self.members {
            if Some(*id) == skip {
                continue;
            }
            if member.sender.try_send(frame.clone()).is_err() {
                slow.push(*id);
            }
        }
        slow
    }

    fn send_to(&self, conn: ConnectionId, frame: Outbound) -> bool {
        self.members
            .get(&conn)
            .map(|m| m.sender.try_send(frame).is_ok())
            .unwrap_or(false)
    }
}

/// One active collaboration room.
pub struct Room<D> {
    pub id: RoomId,
    state: Mutex<RoomState<D>>,
}

impl<D> Room<D> {
    fn new(id: RoomId, doc: D) -> Self {
        Self {
            id,
            state: Mutex::new(RoomState::new(doc)),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RoomState<D>> {
        self.state.lock()
    }
}

/// Owns every active room: lazy creation, eager eviction.
pub struct RoomStore<E: SyncEngine> {
    engine: E,
    rooms: RwLock<HashMap<RoomId, Arc<Room<E::Doc>>>>,
    max_rooms: Option<usize>,
    max_members: Option<usize>,
}

impl<E: SyncEngine> RoomStore<E> {
    pub fn new(engine: E, config: &CollabConfig) -> Self {
        Self {
            engine,
            rooms: RwLock::new(HashMap::new()),
            max_rooms: config.max_rooms,
            max_members: config.max_members_per_room,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn get(&self, id: &RoomId) -> Option<Arc<Room<E::Doc>>> {
        self.rooms.read().get(id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Whether a room record currently exists.
    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.read().contains_key(id)
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Queues the join ack and the document snapshot to the joiner under the
    /// room lock, so everything merged after the snapshot point reaches the
    /// joiner as ordinary updates with no gap and no duplicate. Returns the
    /// snapshot and any members evicted for queue overflow.
    pub fn join(
        &self,
        room_id: &RoomId,
        conn: ConnectionId,
        profile: JoinProfile,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<(RoomSnapshot, Vec<ConnectionId>), CollabError> {
        loop {
            let room = self.get_or_create(room_id)?;
            let mut state = room.lock_state();
            if state.is_evicted() {
                // Lost the race against the last leave; the record is being
                // torn down. Try again with a fresh room.
                continue;
            }

            if state.is_member(conn) {
                // Idempotent re-join: re-send the current snapshot, change
                // nothing, tell no one.
                let snapshot = self.snapshot_locked(room_id, &state);
                state.send_to(conn, Outbound::Control(ServerMessage::RoomJoined {
                    room_id: room_id.clone(),
                    presence: snapshot.presence.clone(),
                }));
                state.send_to(conn, Outbound::State(snapshot.state.clone()));
                return Ok((snapshot, Vec::new()));
            }

            if let Some(limit) = self.max_members {
                if state.member_count() >= limit {
                    return Err(CollabError::RoomFull {
                        room: room_id.clone(),
                        limit,
                    });
                }
            }

            let user_id = profile.user_id.clone();
            let record =
                PresenceRecord::new(user_id.clone(), profile.name.clone(), profile.color.clone());

            state.members.insert(
                conn,
                Member {
                    user_id: user_id.clone(),
                    sender: sender.clone(),
                },
            );
            // Replace-on-reconnect: one record per logical user.
            state.presence.insert(user_id.clone(), record.clone());

            let snapshot = self.snapshot_locked(room_id, &state);
            let sent = sender
                .try_send(Outbound::Control(ServerMessage::RoomJoined {
                    room_id: room_id.clone(),
                    presence: snapshot.presence.clone(),
                }))
                .is_ok()
                && sender.try_send(Outbound::State(snapshot.state.clone())).is_ok();
            if !sent {
                tracing::warn!(room = %room_id, conn = %conn, "joiner queue overflowed on snapshot");
            }

            let slow = state.broadcast(
                Some(conn),
                &Outbound::Control(ServerMessage::Presence(PresenceEvent::Joined {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    presence: record,
                })),
            );

            tracing::debug!(room = %room_id, conn = %conn, user = %user_id,
                members = state.member_count(), "connection joined room");
            return Ok((snapshot, slow));
        }
    }

    /// Remove a connection from a room.
    ///
    /// Clears the user's presence (broadcasting `left`) unless the same user
    /// is still present on another connection, and evicts the room when the
    /// member set empties. Unknown rooms and non-members are benign no-ops.
    pub fn leave(&self, room_id: &RoomId, conn: ConnectionId) -> Vec<ConnectionId> {
        let Some(room) = self.get(room_id) else {
            return Vec::new();
        };

        let mut state = room.lock_state();
        let Some(member) = state.members.remove(&conn) else {
            return Vec::new();
        };

        let mut slow = Vec::new();
        let user_id = member.user_id;
        if !state.user_has_other_connection(&user_id, conn) {
            state.presence.remove(&user_id);
            slow = state.broadcast(
                None,
                &Outbound::Control(ServerMessage::Presence(PresenceEvent::Left {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                })),
            );
        }

        tracing::debug!(room = %room_id, conn = %conn, user = %user_id,
            members = state.member_count(), "connection left room");

        if state.members.is_empty() {
            state.evicted = true;
            drop(state);
            let mut rooms = self.rooms.write();
            if let Some(current) = rooms.get(room_id) {
                if Arc::ptr_eq(current, &room) {
                    rooms.remove(room_id);
                    tracing::info!(room = %room_id, "room evicted");
                }
            }
        }
        slow
    }

    /// Read-only membership summary (`None` for absent rooms).
    pub fn summary(&self, room_id: &RoomId) -> Option<RoomSummary> {
        let room = self.get(room_id)?;
        let state = room.lock_state();
        if state.is_evicted() {
            return None;
        }
        let mut users: Vec<UserId> = state.presence.keys().cloned().collect();
        users.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Some(RoomSummary {
            room_id: room_id.clone(),
            member_count: state.member_count(),
            users,
        })
    }

    fn snapshot_locked(&self, room_id: &RoomId, state: &RoomState<E::Doc>) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.clone(),
            state: self.engine.serialize(&state.doc),
            presence: state.roster(),
        }
    }

    fn get_or_create(&self, id: &RoomId) -> Result<Arc<Room<E::Doc>>, CollabError> {
        if let Some(room) = self.rooms.read().get(id) {
            return Ok(room.clone());
        }
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get(id) {
            return Ok(room.clone());
        }
        if let Some(max) = self.max_rooms {
            if rooms.len() >= max {
                return Err(CollabError::RoomCapacity(max));
            }
        }
        let room = Arc::new(Room::new(id.clone(), self.engine.empty_document()));
        rooms.insert(id.clone(), room.clone());
        tracing::info!(room = %id, "room created");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_sync::SetEngine;

    fn store_with(config: CollabConfig) -> RoomStore<SetEngine> {
        RoomStore::new(SetEngine::new(), &config)
    }

    fn store() -> RoomStore<SetEngine> {
        store_with(CollabConfig::default())
    }

    fn profile(user: &str) -> JoinProfile {
        JoinProfile {
            user_id: UserId::from(user),
            name: user.to_string(),
            color: None,
        }
    }

    fn conn() -> (ConnectionId, mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionId::new(), tx, rx)
    }

    #[test]
    fn room_exists_iff_members_remain() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        let (b, tx_b, _rx_b) = conn();

        assert!(!rooms.contains(&room_id));
        rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();
        assert!(rooms.contains(&room_id));
        rooms.join(&room_id, b, profile("userB"), tx_b).unwrap();

        rooms.leave(&room_id, a);
        assert!(rooms.contains(&room_id), "room survives while B remains");
        rooms.leave(&room_id, b);
        assert!(!rooms.contains(&room_id), "last leave evicts the room");
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn rejoin_by_same_connection_is_a_noop() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        let (b, tx_b, mut rx_b) = conn();

        rooms.join(&room_id, a, profile("userA"), tx_a.clone()).unwrap();
        rooms.join(&room_id, b, profile("userB"), tx_b).unwrap();
        while rx_b.try_recv().is_ok() {}

        let (snapshot, _) = rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();
        assert_eq!(snapshot.presence.len(), 2);
        assert_eq!(rooms.summary(&room_id).unwrap().member_count, 2);
        assert!(rx_b.try_recv().is_err(), "no re-join broadcast to peers");
    }

    #[test]
    fn joiner_gets_ack_then_snapshot() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();

        // Merge something, then join a second connection.
        {
            let room = rooms.get(&room_id).unwrap();
            let mut state = room.lock_state();
            rooms.engine().merge(state.doc_mut(), b"u1").unwrap();
        }

        let (b, tx_b, mut rx_b) = conn();
        let (snapshot, _) = rooms.join(&room_id, b, profile("userB"), tx_b).unwrap();
        assert!(!snapshot.state.is_empty(), "snapshot reflects prior merges");

        match rx_b.try_recv().unwrap() {
            Outbound::Control(ServerMessage::RoomJoined { presence, .. }) => {
                assert_eq!(presence.len(), 2)
            }
            other => panic!("expected join ack first, got {other:?}"),
        }
        match rx_b.try_recv().unwrap() {
            Outbound::State(state) => assert_eq!(state, snapshot.state),
            other => panic!("expected snapshot second, got {other:?}"),
        }
    }

    #[test]
    fn eviction_discards_document_state() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();
        {
            let room = rooms.get(&room_id).unwrap();
            let mut state = room.lock_state();
            rooms.engine().merge(state.doc_mut(), b"u1").unwrap();
        }
        rooms.leave(&room_id, a);

        let (c, tx_c, _rx_c) = conn();
        let (snapshot, _) = rooms.join(&room_id, c, profile("userC"), tx_c).unwrap();
        assert!(snapshot.state.is_empty(), "re-entry starts a fresh document");
    }

    #[test]
    fn reconnect_replaces_presence_record() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (old, tx_old, _rx_old) = conn();
        let (new, tx_new, _rx_new) = conn();

        rooms.join(&room_id, old, profile("userA"), tx_old).unwrap();
        rooms.join(&room_id, new, profile("userA"), tx_new).unwrap();

        let summary = rooms.summary(&room_id).unwrap();
        assert_eq!(summary.member_count, 2);
        assert_eq!(summary.users, vec![UserId::from("userA")]);

        // Dropping the stale connection keeps the surviving record.
        rooms.leave(&room_id, old);
        let summary = rooms.summary(&room_id).unwrap();
        assert_eq!(summary.users, vec![UserId::from("userA")]);
    }

    #[test]
    fn room_capacity_is_enforced_without_side_effects() {
        let rooms = store_with(CollabConfig {
            max_rooms: Some(1),
            ..CollabConfig::default()
        });
        let (a, tx_a, _rx_a) = conn();
        rooms.join(&RoomId::from("one"), a, profile("userA"), tx_a).unwrap();

        let (b, tx_b, _rx_b) = conn();
        let result = rooms.join(&RoomId::from("two"), b, profile("userB"), tx_b);
        assert!(matches!(result, Err(CollabError::RoomCapacity(1))));
        assert!(!rooms.contains(&RoomId::from("two")));
    }

    #[test]
    fn member_capacity_is_enforced_without_side_effects() {
        let rooms = store_with(CollabConfig {
            max_members_per_room: Some(1),
            ..CollabConfig::default()
        });
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();

        let (b, tx_b, _rx_b) = conn();
        let result = rooms.join(&room_id, b, profile("userB"), tx_b);
        assert!(matches!(result, Err(CollabError::RoomFull { .. })));
        assert_eq!(rooms.summary(&room_id).unwrap().member_count, 1);
    }

    #[test]
    fn leave_broadcasts_left_and_drops_user_from_summary() {
        let rooms = store();
        let room_id = RoomId::from("abc");
        let (a, tx_a, _rx_a) = conn();
        let (b, tx_b, mut rx_b) = conn();
        rooms.join(&room_id, a, profile("userA"), tx_a).unwrap();
        rooms.join(&room_id, b, profile("userB"), tx_b).unwrap();
        while rx_b.try_recv().is_ok() {}

        rooms.leave(&room_id, a);
        match rx_b.try_recv().unwrap() {
            Outbound::Control(ServerMessage::Presence(PresenceEvent::Left { user_id, .. })) => {
                assert_eq!(user_id.as_str(), "userA")
            }
            other => panic!("expected left event, got {other:?}"),
        }
        assert_eq!(rooms.summary(&room_id).unwrap().users, vec![UserId::from("userB")]);
    }

    #[test]
    fn leave_of_unknown_room_is_a_noop() {
        let rooms = store();
        rooms.leave(&RoomId::from("ghost"), ConnectionId::new());
        assert_eq!(rooms.room_count(), 0);
    }
}
