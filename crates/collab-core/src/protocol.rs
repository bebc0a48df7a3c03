//! Wire protocol
//!
//! Control traffic (join/leave/presence) rides in JSON text frames; document
//! updates ride in binary frames whose contents belong entirely to the sync
//! engine. The relay never parses a binary payload.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::presence::{CursorPosition, PresenceEvent, PresenceRecord};
use crate::room::RoomId;
use crate::UserId;

/// Client -> Server control messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a room (creating it if absent), declaring the user identity this
    /// connection speaks for.
    JoinRoom {
        room_id: RoomId,
        user_id: UserId,
        name: String,
        #[serde(default)]
        color: Option<String>,
    },
    /// Leave the current room.
    LeaveRoom,
    /// Upsert a subset of this user's presence fields.
    SetPresence {
        #[serde(default)]
        cursor: Option<CursorPosition>,
        #[serde(default)]
        typing: Option<bool>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    /// File tree operation (create/delete/rename) for the current room. The
    /// payload is relayed verbatim to the other members; the server never
    /// interprets it.
    FileOperation { payload: serde_json::Value },
}

/// Server -> Client control messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join acknowledged; the binary snapshot frame follows immediately.
    RoomJoined {
        room_id: RoomId,
        presence: Vec<PresenceRecord>,
    },
    /// Presence delta from another member of the room.
    Presence(PresenceEvent),
    /// File tree operation relayed from another member of the room.
    FileOperation { payload: serde_json::Value },
    /// A request was refused. The connection stays open; the client may
    /// retry or surface the message.
    Error { code: String, message: String },
}

/// One frame queued for delivery to a single connection.
///
/// A connection's queue is the per-peer FIFO that preserves the room's
/// broadcast order; frames are enqueued under the room lock and drained by
/// the connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Full document state for a newly joined connection.
    State(Vec<u8>),
    /// Incremental update relayed verbatim from a peer.
    Update(Vec<u8>),
    /// Control / presence traffic.
    Control(ServerMessage),
}

impl Outbound {
    /// Encode for the WebSocket transport.
    pub fn into_ws_message(self) -> Result<WsMessage, serde_json::Error> {
        Ok(match self {
            Outbound::State(bytes) | Outbound::Update(bytes) => WsMessage::Binary(bytes),
            Outbound::Control(msg) => WsMessage::Text(serde_json::to_string(&msg)?),
        })
    }
}
