//! Status socket message definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::state::{LocalState, Muting, RemoteState, Snapshot, StreamMode};

/// Largest frame accepted from a client
pub const MAX_FRAME: usize = 1024 * 1024;

/// Requests from a local client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state events
    Subscribe,
}

/// Responses and pushed events from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Status(DaemonStatus),

    Pong,

    Subscribed,

    /// Pushed to subscribed clients
    Event { event: StateEvent },

    Error { code: String, message: String },
}

/// Full daemon status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub mode: StreamMode,
    pub muting: Muting,
    pub local: LocalState,
    pub remote: RemoteState,
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn from_snapshot(snapshot: &Snapshot, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: snapshot.routing.mode,
            muting: snapshot.routing.muting,
            local: snapshot.state.local,
            remote: snapshot.state.remote,
            uptime_secs,
        }
    }
}
