//! Presence tracking and broadcast
//!
//! Ephemeral per-user metadata (cursor, typing flag, display name/color),
//! distinct from document content. Records are keyed by user, not by
//! connection: a reconnect replaces the old record. Presence deltas share the
//! room's ordering point with document updates, so a peer never sees a cursor
//! referencing content it cannot have received yet.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollabError;
use crate::protocol::{Outbound, ServerMessage};
use crate::registry::ConnectionId;
use crate::room::{RoomId, RoomStore};
use crate::{UserColor, UserId};
use collab_sync::SyncEngine;

/// Cursor position in the shared document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Line number (0-indexed)
    pub line: u32,
    /// Column number (0-indexed)
    pub column: u32,
}

/// Per-user presence record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub name: String,
    pub color: String,
    pub cursor: Option<CursorPosition>,
    pub typing: bool,
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn new(user_id: UserId, name: String, color: Option<String>) -> Self {
        let color = color.unwrap_or_else(|| UserColor::from_user_id(&user_id).to_hex());
        Self {
            user_id,
            name,
            color,
            cursor: None,
            typing: false,
            updated_at: Utc::now(),
        }
    }
}

/// Subset of presence fields to upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub cursor: Option<CursorPosition>,
    pub typing: Option<bool>,
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Presence delta broadcast to the other members of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PresenceEvent {
    /// A user joined, or re-announced their record (name/color change,
    /// reconnect). Carries the full record so clients can upsert.
    Joined {
        room_id: RoomId,
        user_id: UserId,
        presence: PresenceRecord,
    },
    Left {
        room_id: RoomId,
        user_id: UserId,
    },
    Cursor {
        room_id: RoomId,
        user_id: UserId,
        cursor: CursorPosition,
    },
    Typing {
        room_id: RoomId,
        user_id: UserId,
        typing: bool,
    },
}

/// Applies presence upserts and fans the deltas out to room members.
pub struct PresenceCoordinator<E: SyncEngine> {
    rooms: Arc<RoomStore<E>>,
}

impl<E: SyncEngine> PresenceCoordinator<E> {
    pub fn new(rooms: Arc<RoomStore<E>>) -> Self {
        Self { rooms }
    }

    /// Upsert the provided fields into the origin user's record and
    /// broadcast the matching deltas to every other member.
    ///
    /// Returns the connections whose queues overflowed, for eviction by the
    /// caller.
    pub fn set_presence(
        &self,
        room_id: &RoomId,
        origin: ConnectionId,
        update: PresenceUpdate,
    ) -> Result<Vec<ConnectionId>, CollabError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CollabError::UnknownRoom(room_id.clone()))?;

        let mut state = room.lock_state();
        let user_id = state
            .member_user(origin)
            .ok_or_else(|| CollabError::UnknownRoom(room_id.clone()))?;

        let Some(record) = state.presence_mut(&user_id) else {
            // Member without a record should not happen; treat as a no-op.
            tracing::warn!(room = %room_id, user = %user_id, "presence record missing");
            return Ok(Vec::new());
        };

        let identity_changed = update.name.is_some() || update.color.is_some();
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(color) = update.color {
            record.color = color;
        }
        if let Some(cursor) = update.cursor {
            record.cursor = Some(cursor);
        }
        if let Some(typing) = update.typing {
            record.typing = typing;
        }
        record.updated_at = Utc::now();
        let record = record.clone();

        let mut events = Vec::new();
        if identity_changed {
            events.push(PresenceEvent::Joined {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                presence: record.clone(),
            });
        }
        if let Some(cursor) = update.cursor {
            events.push(PresenceEvent::Cursor {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                cursor,
            });
        }
        if let Some(typing) = update.typing {
            events.push(PresenceEvent::Typing {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                typing,
            });
        }

        let mut victims = Vec::new();
        for event in events {
            victims.extend(
                state.broadcast(Some(origin), &Outbound::Control(ServerMessage::Presence(event))),
            );
        }
        victims.sort_unstable();
        victims.dedup();
        Ok(victims)
    }
}
