//! Configuration loading and management

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sensor::DEFAULT_BAUD;
use crate::state::{MuteConfig, Muting};

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("neither BLANC_DATA_DIR nor HOME is set")]
    NoDataDir,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the paired device
    pub remote_host: IpAddr,

    /// UDP port for audio packets (same on both devices)
    pub audio_port: u16,

    /// UDP port for heartbeats and orientation messages
    pub control_port: u16,

    /// Device node of the sensor/motor microcontroller
    pub serial_port: PathBuf,

    /// Line speed of the sensor/motor microcontroller
    pub serial_baud: u32,

    /// Substring identifying the personal microphone
    pub personal_mic: String,

    /// Substring identifying the global microphone
    pub global_mic: String,

    /// Channels silenced on playback per mode
    pub mute: MuteConfig,

    /// Max packets held for reordering
    pub reorder_capacity: usize,

    /// Max delivered chunks waiting for playback
    pub playback_queue: usize,

    /// How long local pressure must be held before the motor follows the remote
    pub hold_duration: Duration,

    /// Interval between outgoing heartbeats
    pub heartbeat_interval: Duration,

    /// Silence after which the peer counts as disconnected
    pub connection_timeout: Duration,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Path to the Unix domain socket for status queries
    pub socket_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup("BLANC_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").ok_or(ConfigError::NoDataDir)?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("blanc-daemon")
            }
        };
        let socket_path = data_dir.join("daemon.sock");

        let mute = MuteConfig {
            personal: parsed(&lookup, "BLANC_PERSONAL_MUTE", Muting::Left)?,
            global: parsed(&lookup, "BLANC_GLOBAL_MUTE", Muting::Right)?,
        };

        let reorder_capacity = parsed(&lookup, "BLANC_REORDER_CAPACITY", 10usize)?;
        if reorder_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "BLANC_REORDER_CAPACITY",
                value: "0".into(),
            });
        }

        Ok(Self {
            remote_host: parsed(&lookup, "BLANC_REMOTE_HOST", IpAddr::from([127, 0, 0, 1]))?,
            audio_port: parsed(&lookup, "BLANC_AUDIO_PORT", 6000)?,
            control_port: parsed(&lookup, "BLANC_CONTROL_PORT", 8888)?,
            serial_port: lookup("BLANC_SERIAL_PORT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/dev/ttyACM0")),
            serial_baud: parsed(&lookup, "BLANC_SERIAL_BAUD", DEFAULT_BAUD)?,
            personal_mic: lookup("BLANC_PERSONAL_MIC").unwrap_or_else(|| "TX 96Khz".into()),
            global_mic: lookup("BLANC_GLOBAL_MIC").unwrap_or_else(|| "USB Audio Device".into()),
            mute,
            reorder_capacity,
            playback_queue: parsed(&lookup, "BLANC_PLAYBACK_QUEUE", 32usize)?.max(1),
            hold_duration: Duration::from_millis(parsed(&lookup, "BLANC_HOLD_MS", 1000u64)?),
            heartbeat_interval: Duration::from_secs(2),
            connection_timeout: Duration::from_secs(7),
            data_dir,
            socket_path,
        })
    }

    /// Where the paired device receives audio
    pub fn remote_audio_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_host, self.audio_port)
    }

    /// Where the paired device receives control messages
    pub fn remote_control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_host, self.control_port)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
