//! Local and remote device state

use serde::{Deserialize, Serialize};

/// Mount orientation reported by the sensor board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orientation {
    pub y: i32,
    pub z: i32,
}

/// State of this device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub orientation: Orientation,
    pub pressure: bool,
    /// Motor is currently matching the remote orientation
    pub moving: bool,
}

/// Last known state of the paired device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    pub orientation: Orientation,
    pub pressure: bool,
    pub connected: bool,
}

/// Both halves of the installation as seen from this device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub local: LocalState,
    pub remote: RemoteState,
}

/// Mutations sent to the state machine by its collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    /// New sensor reading from the local board
    Local {
        orientation: Orientation,
        pressure: bool,
    },
    /// New reading received from the peer
    Remote {
        orientation: Orientation,
        pressure: bool,
    },
    /// Peer link came up or timed out
    Connection(bool),
    /// Motor started or finished moving
    Moving(bool),
}

impl SystemState {
    /// Apply an update in place
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Local { orientation, pressure } => {
                self.local.orientation = orientation;
                self.local.pressure = pressure;
            }
            StateUpdate::Remote { orientation, pressure } => {
                self.remote.orientation = orientation;
                self.remote.pressure = pressure;
            }
            StateUpdate::Connection(connected) => {
                self.remote.connected = connected;
            }
            StateUpdate::Moving(moving) => {
                self.local.moving = moving;
            }
        }
    }
}
