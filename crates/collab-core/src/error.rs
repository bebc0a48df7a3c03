//! Error taxonomy for the realtime core
//!
//! Every variant is scoped to a single connection's request; none of them
//! corrupt room state or disconnect other members.

use thiserror::Error;

use crate::room::RoomId;
use collab_sync::MergeError;

#[derive(Debug, Clone, Error)]
pub enum CollabError {
    /// The referenced room has no active record, or the origin connection is
    /// not a member of it.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// The connection sent a room-scoped message before joining a room.
    #[error("connection has not joined a room")]
    NotInRoom,

    /// The sync engine refused the update buffer. The update is dropped and
    /// the sender stays connected.
    #[error("update rejected: {0}")]
    MergeRejected(#[from] MergeError),

    /// The optional room cap is set and reached; the join is refused with no
    /// side effects.
    #[error("room capacity reached ({0} rooms)")]
    RoomCapacity(usize),

    /// The optional per-room member cap is set and reached.
    #[error("room {room} is full ({limit} members)")]
    RoomFull { room: RoomId, limit: usize },

    /// Send/receive failure on a connection. Triggers that connection's
    /// leave path and never propagates to other members.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CollabError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CollabError::UnknownRoom(_) => "unknown_room",
            CollabError::NotInRoom => "not_in_room",
            CollabError::MergeRejected(_) => "merge_rejected",
            CollabError::RoomCapacity(_) => "room_capacity",
            CollabError::RoomFull { .. } => "room_full",
            CollabError::Transport(_) => "transport",
        }
    }
}
