//! Server configuration
//!
//! Loaded from a TOML file; every knob has a default so an empty file (or no
//! file at all) yields a working server.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Address the WebSocket listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// A connection silent for longer than this is closed and treated as a
    /// leave.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Capacity of each connection's outbound queue. A peer whose queue
    /// overflows is disconnected rather than allowed to backpressure its
    /// room.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Optional cap on concurrently active rooms.
    #[serde(default)]
    pub max_rooms: Option<usize>,

    /// Optional cap on members per room.
    #[serde(default)]
    pub max_members_per_room: Option<usize>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:1234".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_send_queue_capacity() -> usize {
    256
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            idle_timeout_secs: default_idle_timeout_secs(),
            send_queue_capacity: default_send_queue_capacity(),
            max_rooms: None,
            max_members_per_room: None,
        }
    }
}

impl CollabConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
