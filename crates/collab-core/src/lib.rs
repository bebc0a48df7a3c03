//! # Collab Pad Core
//!
//! Room-scoped realtime collaboration backend:
//! - one authoritative CRDT document per room, merged through a pluggable
//!   sync engine and relayed verbatim to peers
//! - presence awareness (cursors, typing, names/colors) per room
//! - WebSocket transport with per-connection bounded send queues
//!
//! Rooms are created on first join and evicted on last leave; each room's
//! state is serialized behind its own lock so rooms never contend with each
//! other.

pub mod config;
pub mod error;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;

use serde::{Deserialize, Serialize};

pub use config::CollabConfig;
pub use error::CollabError;
pub use hub::Hub;
pub use presence::{CursorPosition, PresenceCoordinator, PresenceEvent, PresenceRecord, PresenceUpdate};
pub use protocol::{ClientMessage, Outbound, ServerMessage};
pub use registry::{ConnectionId, Registry};
pub use relay::Relay;
pub use room::{JoinProfile, Room, RoomId, RoomSnapshot, RoomStore, RoomSummary};
pub use server::serve;

/// Unique user identifier, supplied by the client.
///
/// Presence is keyed per user, not per connection: a user who reconnects
/// replaces their previous record instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// User's assigned color (for cursor and selection highlights)
#[derive(Debug, Clone, Copy)]
pub struct UserColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl UserColor {
    /// Derive a stable, pleasant color from a user id.
    pub fn from_user_id(id: &UserId) -> Self {
        let mut acc: u32 = 2166136261;
        for byte in id.as_str().bytes() {
            acc ^= byte as u32;
            acc = acc.wrapping_mul(16777619);
        }
        let hue = (acc % 360) as f32;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
        Self { r, g, b }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r, g, b) = match (h as u32) / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
