//! Update relay
//!
//! Takes an opaque update buffer from one member, merges it into the room's
//! authoritative document through the sync engine, and fans the identical
//! bytes out to every other member. The relay never constructs or inspects
//! document content; that invariant is what keeps it transport-agnostic and
//! engine-agnostic.

use std::sync::Arc;

use crate::error::CollabError;
use crate::protocol::{Outbound, ServerMessage};
use crate::registry::ConnectionId;
use crate::room::{RoomId, RoomStore};
use collab_sync::SyncEngine;

pub struct Relay<E: SyncEngine> {
    rooms: Arc<RoomStore<E>>,
}

impl<E: SyncEngine> Relay<E> {
    pub fn new(rooms: Arc<RoomStore<E>>) -> Self {
        Self { rooms }
    }

    /// Merge `update` into the room's document, then forward the exact same
    /// bytes to every other member. The originator never receives its own
    /// update back.
    ///
    /// A buffer the engine rejects is logged and dropped: the document is
    /// untouched, nothing is broadcast, and the sender stays connected.
    /// Returns the members whose queues overflowed, for eviction by the
    /// caller.
    pub fn apply_and_broadcast(
        &self,
        room_id: &RoomId,
        origin: ConnectionId,
        update: Vec<u8>,
    ) -> Result<Vec<ConnectionId>, CollabError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CollabError::UnknownRoom(room_id.clone()))?;

        let mut state = room.lock_state();
        if state.is_evicted() || !state.is_member(origin) {
            return Err(CollabError::UnknownRoom(room_id.clone()));
        }

        if let Err(e) = self.rooms.engine().merge(state.doc_mut(), &update) {
            tracing::warn!(room = %room_id, conn = %origin, error = %e,
                "dropping update rejected by sync engine");
            return Err(CollabError::MergeRejected(e));
        }

        Ok(state.broadcast(Some(origin), &Outbound::Update(update)))
    }

    /// Forward a file tree operation (create/delete/rename) to every other
    /// member. The payload is opaque to the server; only the sender's
    /// membership is checked. The document is not involved.
    pub fn relay_file_operation(
        &self,
        room_id: &RoomId,
        origin: ConnectionId,
        payload: serde_json::Value,
    ) -> Result<Vec<ConnectionId>, CollabError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CollabError::UnknownRoom(room_id.clone()))?;

        let state = room.lock_state();
        if state.is_evicted() || !state.is_member(origin) {
            return Err(CollabError::UnknownRoom(room_id.clone()));
        }

        let frame = Outbound::Control(ServerMessage::FileOperation { payload });
        Ok(state.broadcast(Some(origin), &frame))
    }
}
