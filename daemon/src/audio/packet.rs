//! Audio packet wire format
//!
//! Each UDP datagram carries one captured chunk:
//!
//! ```text
//! +----------------+--------+------------------------+
//! | sequence (u32) | source | PCM payload (s16le x2) |
//! |   big-endian   |  u8    |                        |
//! +----------------+--------+------------------------+
//! ```

use serde::{Deserialize, Serialize};

/// Size of the sequence + source header
pub const HEADER_LEN: usize = 5;

/// Microphone a packet was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicSource {
    Personal,
    Global,
}

impl MicSource {
    pub fn tag(self) -> u8 {
        match self {
            MicSource::Personal => 0,
            MicSource::Global => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MicSource::Personal),
            1 => Some(MicSource::Global),
            _ => None,
        }
    }
}

impl std::fmt::Display for MicSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MicSource::Personal => write!(f, "personal"),
            MicSource::Global => write!(f, "global"),
        }
    }
}

/// Errors decoding a datagram
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the packet header")]
    TooShort(usize),

    #[error("unknown source tag {tag} on packet {sequence}")]
    UnknownSource { sequence: u32, tag: u8 },
}

/// One sequenced chunk of PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub sequence: u32,
    pub source: MicSource,
    pub payload: Vec<u8>,
}

impl AudioPacket {
    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.push(self.source.tag());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a received datagram
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_LEN {
            return Err(PacketError::TooShort(datagram.len()));
        }

        let sequence = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        let source = MicSource::from_tag(datagram[4]).ok_or(PacketError::UnknownSource {
            sequence,
            tag: datagram[4],
        })?;

        Ok(Self {
            sequence,
            source,
            payload: datagram[HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let packet = AudioPacket {
            sequence: 0x0102_0304,
            source: MicSource::Global,
            payload: vec![0xAA, 0xBB],
        };
        assert_eq!(packet.encode(), vec![1, 2, 3, 4, 1, 0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_personal() {
        let packet = AudioPacket::decode(&[0, 0, 1, 0, 0, 9, 8, 7, 6]).unwrap();
        assert_eq!(packet.sequence, 256);
        assert_eq!(packet.source, MicSource::Personal);
        assert_eq!(packet.payload, vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_header_only_is_valid() {
        let packet = AudioPacket::decode(&[0, 0, 0, 7, 1]).unwrap();
        assert_eq!(packet.sequence, 7);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_short_datagram_rejected() {
        assert_eq!(AudioPacket::decode(&[0, 0, 0, 1]), Err(PacketError::TooShort(4)));
        assert_eq!(AudioPacket::decode(&[]), Err(PacketError::TooShort(0)));
    }

    #[test]
    fn test_unknown_source_rejected() {
        assert_eq!(
            AudioPacket::decode(&[0, 0, 0, 1, 7, 0, 0]),
            Err(PacketError::UnknownSource { sequence: 1, tag: 7 })
        );
    }
}
