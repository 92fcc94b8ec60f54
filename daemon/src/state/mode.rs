//! Pressure-to-mode decision table
//!
//! Each device streams one of its two microphones to its peer depending on
//! who is standing on which pressure plate, and plays the peer's stream back
//! with one speaker channel silenced.

use serde::{Deserialize, Serialize};

use crate::audio::MicSource;

/// Which microphone, if any, is streamed to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Nothing is sent and nothing is played
    #[default]
    None,
    /// Personal mic is streamed
    Personal,
    /// Global (room) mic is streamed
    Global,
}

impl StreamMode {
    /// The microphone this mode captures from
    pub fn source(self) -> Option<MicSource> {
        match self {
            StreamMode::None => None,
            StreamMode::Personal => Some(MicSource::Personal),
            StreamMode::Global => Some(MicSource::Global),
        }
    }

    pub fn is_streaming(self) -> bool {
        self != StreamMode::None
    }
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamMode::None => write!(f, "None"),
            StreamMode::Personal => write!(f, "Personal"),
            StreamMode::Global => write!(f, "Global"),
        }
    }
}

/// Speaker channel silenced during playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Muting {
    Left,
    Right,
    Both,
}

impl std::str::FromStr for Muting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Muting::Left),
            "right" => Ok(Muting::Right),
            "both" => Ok(Muting::Both),
            other => Err(format!("unknown channel {other:?}")),
        }
    }
}

impl std::fmt::Display for Muting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Muting::Left => write!(f, "left"),
            Muting::Right => write!(f, "right"),
            Muting::Both => write!(f, "both"),
        }
    }
}

/// Channel muted for each streaming mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteConfig {
    pub personal: Muting,
    pub global: Muting,
}

impl Default for MuteConfig {
    fn default() -> Self {
        Self {
            personal: Muting::Left,
            global: Muting::Right,
        }
    }
}

/// Derived audio routing for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub mode: StreamMode,
    pub muting: Muting,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            mode: StreamMode::None,
            muting: Muting::Both,
        }
    }
}

impl Routing {
    /// Compute routing from the three inputs of the decision table
    pub fn decide(
        local_pressure: bool,
        remote_pressure: bool,
        remote_connected: bool,
        mute: &MuteConfig,
    ) -> Self {
        let mode = decide_mode(local_pressure, remote_pressure, remote_connected);
        Self {
            mode,
            muting: decide_muting(mode, mute),
        }
    }
}

/// Pick the streaming mode from local/remote pressure and peer connectivity
pub fn decide_mode(local_pressure: bool, remote_pressure: bool, remote_connected: bool) -> StreamMode {
    if !remote_connected {
        return StreamMode::None;
    }

    match (local_pressure, remote_pressure) {
        (true, _) => StreamMode::Personal,
        (false, true) => StreamMode::Global,
        (false, false) => StreamMode::None,
    }
}

/// Channel to silence on playback for a mode
pub fn decide_muting(mode: StreamMode, mute: &MuteConfig) -> Muting {
    match mode {
        StreamMode::None => Muting::Both,
        StreamMode::Personal => mute.personal,
        StreamMode::Global => mute.global,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table() {
        let mute = MuteConfig::default();
        let cases = [
            // (local, remote, connected) -> (mode, muting)
            ((true, true, true), (StreamMode::Personal, Muting::Left)),
            ((false, true, true), (StreamMode::Global, Muting::Right)),
            ((true, false, true), (StreamMode::Personal, Muting::Left)),
            ((false, false, true), (StreamMode::None, Muting::Both)),
            ((true, true, false), (StreamMode::None, Muting::Both)),
            ((false, true, false), (StreamMode::None, Muting::Both)),
            ((true, false, false), (StreamMode::None, Muting::Both)),
            ((false, false, false), (StreamMode::None, Muting::Both)),
        ];

        for ((local, remote, connected), (mode, muting)) in cases {
            let routing = Routing::decide(local, remote, connected, &mute);
            assert_eq!(routing.mode, mode, "mode for {local}/{remote}/{connected}");
            assert_eq!(routing.muting, muting, "muting for {local}/{remote}/{connected}");
        }
    }

    #[test]
    fn test_custom_mute_channels() {
        let mute = MuteConfig {
            personal: Muting::Right,
            global: Muting::Left,
        };
        assert_eq!(decide_muting(StreamMode::Personal, &mute), Muting::Right);
        assert_eq!(decide_muting(StreamMode::Global, &mute), Muting::Left);
        assert_eq!(decide_muting(StreamMode::None, &mute), Muting::Both);
    }

    #[test]
    fn test_mode_source() {
        assert_eq!(StreamMode::None.source(), None);
        assert_eq!(StreamMode::Personal.source(), Some(MicSource::Personal));
        assert_eq!(StreamMode::Global.source(), Some(MicSource::Global));
    }

    #[test]
    fn test_muting_from_str() {
        assert_eq!("LEFT".parse::<Muting>().unwrap(), Muting::Left);
        assert_eq!("both".parse::<Muting>().unwrap(), Muting::Both);
        assert!("center".parse::<Muting>().is_err());
    }
}
