//! Control message protocol between the paired devices
//!
//! One JSON object per UDP datagram.

use serde::{Deserialize, Serialize};

use crate::state::Orientation;

/// Messages exchanged on the control port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Liveness signal, sent periodically
    Heartbeat,

    /// Sender's current orientation and pressure
    Orientation { y: i32, z: i32, pressure: bool },
}

impl ControlMessage {
    pub fn reading(orientation: Orientation, pressure: bool) -> Self {
        ControlMessage::Orientation {
            y: orientation.y,
            z: orientation.z,
            pressure,
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(datagram: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_serialization() {
        let json = String::from_utf8(ControlMessage::Heartbeat.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn test_orientation_deserialization() {
        let msg = ControlMessage::decode(br#"{"type":"orientation","y":-12,"z":30,"pressure":true}"#)
            .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Orientation {
                y: -12,
                z: 30,
                pressure: true
            }
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ControlMessage::decode(b"/data\0\0\0").is_err());
    }
}
