//! Events module for state machine transitions
//!
//! Structured notifications for mode changes, peer connectivity, pressure
//! edges and motor activity, pushed to subscribed status clients.

use serde::{Deserialize, Serialize};

use crate::state::{Muting, Orientation, StreamMode};

/// Events emitted while the installation state evolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Streaming mode changed
    ModeChanged {
        from: StreamMode,
        to: StreamMode,
        /// Channel silenced on playback in the new mode
        muting: Muting,
        /// How long the previous mode was active
        duration_ms: u64,
    },

    /// First message received from the peer
    PeerConnected,

    /// Peer went silent past the connection timeout
    PeerDisconnected,

    /// Local pressure plate pressed or released
    LocalPressureChanged { pressure: bool },

    /// Remote pressure plate pressed or released
    RemotePressureChanged { pressure: bool },

    /// Motor was sent a target orientation
    MotorStarted { target: Orientation },

    /// Motor reached its target
    MotorSettled,

    /// Motor command could not be delivered
    MotorFailed { message: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ModeChanged { from, to, muting, duration_ms } => {
                write!(f, "MODE_CHANGED {} -> {} (mute {}, {}ms)", from, to, muting, duration_ms)
            }
            StateEvent::PeerConnected => write!(f, "PEER_CONNECTED"),
            StateEvent::PeerDisconnected => write!(f, "PEER_DISCONNECTED"),
            StateEvent::LocalPressureChanged { pressure } => {
                write!(f, "LOCAL_PRESSURE {}", pressure)
            }
            StateEvent::RemotePressureChanged { pressure } => {
                write!(f, "REMOTE_PRESSURE {}", pressure)
            }
            StateEvent::MotorStarted { target } => {
                write!(f, "MOTOR_STARTED (y={}, z={})", target.y, target.z)
            }
            StateEvent::MotorSettled => write!(f, "MOTOR_SETTLED"),
            StateEvent::MotorFailed { message } => write!(f, "MOTOR_FAILED ({})", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::ModeChanged {
            from: StreamMode::None,
            to: StreamMode::Global,
            muting: Muting::Right,
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("mode_changed"));
        assert!(json.contains("\"to\":\"global\""));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"remote_pressure_changed","pressure":true}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, StateEvent::RemotePressureChanged { pressure: true });
    }

    #[test]
    fn test_display() {
        let event = StateEvent::MotorStarted {
            target: Orientation { y: 3, z: -7 },
        };
        assert_eq!(event.to_string(), "MOTOR_STARTED (y=3, z=-7)");
    }
}
