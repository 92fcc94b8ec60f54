//! Audio device capabilities
//!
//! The daemon never talks to sound hardware directly. It asks a backend for
//! the list of capture devices, picks one per microphone role by name, and
//! opens capture/playback streams through the backend.

use std::future::Future;

use tracing::debug;

use super::packet::MicSource;

/// Errors from the audio backend
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to enumerate audio devices: {0}")]
    Enumerate(String),

    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("audio stream failed: {0}")]
    Stream(String),

    #[error("audio stream closed")]
    Closed,
}

/// One input device as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Backend-specific identifier used to open the device
    pub id: String,
    /// Human-readable name matched against the configured mic names
    pub name: String,
    /// Channels to capture with
    pub input_channels: u16,
}

/// Devices chosen for the two microphone roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicSelection {
    pub personal: Option<DeviceDescriptor>,
    pub global: Option<DeviceDescriptor>,
}

impl MicSelection {
    pub fn device(&self, source: MicSource) -> Option<&DeviceDescriptor> {
        match source {
            MicSource::Personal => self.personal.as_ref(),
            MicSource::Global => self.global.as_ref(),
        }
    }
}

/// Source of captured PCM chunks
pub trait CaptureStream: Send {
    /// Fill `buf` completely with s16le samples
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// Destination for interleaved s16le stereo PCM
pub trait PlaybackStream: Send {
    fn write(&mut self, pcm: &[u8]) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// Capability query and stream factory for the platform's audio stack
pub trait AudioBackend: Send + Sync + 'static {
    type Capture: CaptureStream;
    type Playback: PlaybackStream;

    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>, DeviceError>> + Send;

    fn open_capture(
        &self,
        device: &DeviceDescriptor,
    ) -> impl Future<Output = Result<Self::Capture, DeviceError>> + Send;

    fn open_playback(&self) -> impl Future<Output = Result<Self::Playback, DeviceError>> + Send;
}

/// Match microphones by case-insensitive name substring.
///
/// A missing personal mic falls back to the first input device; a missing
/// global mic falls back to whatever the personal role ended up with. The
/// caller logs the outcome, since selection is repeated periodically.
pub fn select_microphones(
    devices: &[DeviceDescriptor],
    personal_name: &str,
    global_name: &str,
) -> MicSelection {
    let find = |needle: &str| {
        let needle = needle.to_lowercase();
        devices
            .iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
            .cloned()
    };

    let personal = find(personal_name).or_else(|| {
        let fallback = devices.first().cloned();
        debug!(
            wanted = personal_name,
            using = ?fallback.as_ref().map(|d| &d.name),
            "personal mic not found, using first input device"
        );
        fallback
    });

    let global = find(global_name).or_else(|| {
        debug!(wanted = global_name, "global mic not found, falling back to personal mic");
        personal.clone()
    });

    MicSelection { personal, global }
}
