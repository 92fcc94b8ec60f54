//! Audio capture and send task
//!
//! Streams the microphone selected by the current mode to the peer. Capture
//! is reopened whenever the mode switches microphones and closed while the
//! mode is `None`. Sequence numbers keep counting across mode changes.
//!
//! Input devices are searched again every `DEVICE_SEARCH_INTERVAL`, so a mic
//! plugged in after startup is picked up. A capture that fails is reopened
//! with backoff while its mode is active.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::lifecycle::backoff;
use crate::state::Routing;

use super::device::{select_microphones, AudioBackend, CaptureStream, DeviceError, MicSelection};
use super::packet::{AudioPacket, MicSource};
use super::playback::mono_to_stereo;

/// Frames captured per packet
pub const CHUNK_FRAMES: usize = 1024;

/// How often input devices are enumerated again
pub const DEVICE_SEARCH_INTERVAL: Duration = Duration::from_secs(30);

/// How often throughput is logged, in packets
const REPORT_EVERY: u64 = 1000;

struct ActiveCapture<C> {
    source: MicSource,
    device_id: String,
    channels: u16,
    stream: C,
}

enum Step {
    Routing(bool),
    Chunk(Result<(), DeviceError>),
    Rescan,
    Retry,
}

/// Send side of the audio link
pub struct AudioSender<B: AudioBackend> {
    backend: Arc<B>,
    socket: UdpSocket,
    peer: SocketAddr,
    personal_mic: String,
    global_mic: String,
    mics: MicSelection,
    sequence: u32,
    sent: u64,
}

impl<B: AudioBackend> AudioSender<B> {
    pub fn new(
        backend: Arc<B>,
        socket: UdpSocket,
        peer: SocketAddr,
        personal_mic: impl Into<String>,
        global_mic: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            socket,
            peer,
            personal_mic: personal_mic.into(),
            global_mic: global_mic.into(),
            mics: MicSelection::default(),
            sequence: 0,
            sent: 0,
        }
    }

    /// Stream until the routing channel closes
    pub async fn run(mut self, mut routing_rx: watch::Receiver<Routing>) -> Result<()> {
        let mut active: Option<MicSource> = None;
        let mut capture: Option<ActiveCapture<B::Capture>> = None;
        let mut failures = 0u32;
        let mut retry_at: Option<Instant> = None;
        let mut buf = Vec::new();

        info!(peer = %self.peer, "audio sender started");
        self.rescan().await;

        let mut rescan = interval_at(Instant::now() + DEVICE_SEARCH_INTERVAL, DEVICE_SEARCH_INTERVAL);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wanted = routing_rx.borrow_and_update().mode.source();
            if wanted != active {
                // Close the old stream before opening the next one.
                capture = None;
                active = wanted;
                failures = 0;
                retry_at = wanted.map(|_| Instant::now());
                if wanted.is_none() {
                    info!("audio sending paused");
                }
            }

            if let (true, Some(source), Some(at)) = (capture.is_none(), active, retry_at) {
                if at <= Instant::now() {
                    match self.open(source).await {
                        Ok(opened) => {
                            buf.resize(CHUNK_FRAMES * 2 * usize::from(opened.channels), 0);
                            capture = Some(opened);
                            retry_at = None;
                        }
                        Err(e) => {
                            failures += 1;
                            let delay = backoff(failures);
                            if failures == 1 {
                                warn!(%source, %e, ?delay, "failed to open microphone, retrying");
                            } else {
                                debug!(%source, %e, failures, ?delay, "microphone still unavailable");
                            }
                            retry_at = Some(Instant::now() + delay);
                        }
                    }
                }
            }

            let step = match capture.as_mut() {
                Some(current) => tokio::select! {
                    changed = routing_rx.changed() => Step::Routing(changed.is_ok()),
                    read = current.stream.read_chunk(&mut buf) => Step::Chunk(read),
                    _ = rescan.tick() => Step::Rescan,
                },
                None => tokio::select! {
                    changed = routing_rx.changed() => Step::Routing(changed.is_ok()),
                    _ = rescan.tick() => Step::Rescan,
                    _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => Step::Retry,
                },
            };

            match step {
                Step::Routing(true) | Step::Retry => {}
                Step::Routing(false) => break,
                Step::Chunk(Ok(())) => {
                    failures = 0;
                    if let Some(current) = capture.as_ref() {
                        let (source, channels) = (current.source, current.channels);
                        self.send_chunk(source, channels, &buf).await;
                    }
                }
                Step::Chunk(Err(e)) => {
                    capture = None;
                    failures += 1;
                    let delay = backoff(failures);
                    warn!(source = ?active, %e, ?delay, "capture failed, reopening");
                    retry_at = Some(Instant::now() + delay);
                }
                Step::Rescan => {
                    if !self.rescan().await {
                        continue;
                    }
                    let Some(source) = active else {
                        continue;
                    };
                    let selected = self.mics.device(source).map(|d| d.id.as_str());
                    match capture.as_ref() {
                        Some(current) if selected == Some(current.device_id.as_str()) => {}
                        Some(_) => {
                            info!(%source, "microphone changed, reopening capture");
                            capture = None;
                            failures = 0;
                            retry_at = Some(Instant::now());
                        }
                        None => {
                            failures = 0;
                            retry_at = Some(Instant::now());
                        }
                    }
                }
            }
        }

        info!(sent = self.sent, "audio sender stopped");
        Ok(())
    }

    /// Enumerate input devices and reselect the mics; true if the selection changed
    async fn rescan(&mut self) -> bool {
        let devices = match self.backend.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(%e, "failed to enumerate input devices");
                return false;
            }
        };

        let selection = select_microphones(&devices, &self.personal_mic, &self.global_mic);
        if selection == self.mics {
            return false;
        }

        info!(
            personal = ?selection.personal.as_ref().map(|d| &d.name),
            global = ?selection.global.as_ref().map(|d| &d.name),
            "microphones selected"
        );
        self.mics = selection;
        true
    }

    async fn open(&mut self, source: MicSource) -> Result<ActiveCapture<B::Capture>, DeviceError> {
        if self.mics.device(source).is_none() {
            self.rescan().await;
        }
        let device = self
            .mics
            .device(source)
            .cloned()
            .ok_or_else(|| DeviceError::Open {
                device: format!("{source} mic"),
                reason: "no input device".into(),
            })?;

        let stream = self.backend.open_capture(&device).await?;
        info!(%source, device = %device.name, "audio sending started");

        Ok(ActiveCapture {
            source,
            channels: device.input_channels.max(1),
            device_id: device.id,
            stream,
        })
    }

    async fn send_chunk(&mut self, source: MicSource, channels: u16, pcm: &[u8]) {
        let payload = if channels == 1 {
            mono_to_stereo(pcm)
        } else {
            pcm.to_vec()
        };

        let packet = AudioPacket {
            sequence: self.sequence,
            source,
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);

        if let Err(e) = self.socket.send_to(&packet.encode(), self.peer).await {
            debug!(?e, "audio send failed");
            return;
        }

        self.sent += 1;
        if self.sent % REPORT_EVERY == 0 {
            info!(sent = self.sent, "audio sender progress");
        }
    }
}
