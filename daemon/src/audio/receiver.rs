//! Audio receive and playback tasks
//!
//! The receiver owns the audio UDP socket and the reorder buffer. Every
//! routing transition discards whatever is buffered so audio captured under
//! the previous mode is never played under the new one. The playback task
//! reopens the output device with backoff whenever it fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::lifecycle::backoff;
use crate::state::{Routing, StreamMode};

use super::device::{AudioBackend, PlaybackStream};
use super::packet::{AudioPacket, MicSource, PacketError};
use super::playback::{apply_muting, PlaybackQueue};
use super::reorder::ReorderBuffer;

/// Receive timeout; expiry is normal and only keeps the loop responsive
pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65_536;

/// How often throughput is logged, in packets
const REPORT_EVERY: u64 = 1000;

/// Receive side of the audio link
pub struct AudioReceiver {
    socket: UdpSocket,
    /// Packets with an unknown source tag keep their slot as `None`
    reorder: ReorderBuffer<Option<AudioPacket>>,
    queue: Arc<PlaybackQueue>,
    mode: StreamMode,
    last_source: Option<MicSource>,
    received: u64,
    report_started: Instant,
}

impl AudioReceiver {
    pub fn new(socket: UdpSocket, reorder_capacity: usize, queue: Arc<PlaybackQueue>) -> Self {
        Self {
            socket,
            reorder: ReorderBuffer::new(reorder_capacity),
            queue,
            mode: StreamMode::None,
            last_source: None,
            received: 0,
            report_started: Instant::now(),
        }
    }

    /// Bind the receive socket on all interfaces
    pub async fn bind(port: u16, reorder_capacity: usize, queue: Arc<PlaybackQueue>) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind audio port {port}"))?;
        info!(port, "audio receiver listening");
        Ok(Self::new(socket, reorder_capacity, queue))
    }

    /// Receive until the routing channel closes
    pub async fn run(mut self, mut routing_rx: watch::Receiver<Routing>) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        self.on_routing(*routing_rx.borrow_and_update());

        loop {
            tokio::select! {
                changed = routing_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let routing = *routing_rx.borrow_and_update();
                    self.on_routing(routing);
                }
                received = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => trace!("audio receive timeout"),
                        Ok(Err(e)) => {
                            warn!(?e, "audio receive error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Ok(Ok((len, from))) => {
                            trace!(len, %from, "audio datagram");
                            self.handle_datagram(&buf[..len]);
                        }
                    }
                }
            }
        }

        info!("audio receiver stopped");
        Ok(())
    }

    /// React to a routing transition
    pub fn on_routing(&mut self, routing: Routing) {
        if routing.mode != self.mode {
            debug!(from = %self.mode, to = %routing.mode, "discarding buffered audio");
            self.reorder.clear();
            self.queue.clear();
            self.mode = routing.mode;
        }
    }

    /// Decode, reorder and hand a datagram to playback
    pub fn handle_datagram(&mut self, datagram: &[u8]) {
        let (sequence, packet) = match AudioPacket::decode(datagram) {
            Ok(packet) => {
                if self.last_source != Some(packet.source) {
                    debug!(source = %packet.source, "peer audio source changed");
                    self.last_source = Some(packet.source);
                }
                (packet.sequence, Some(packet))
            }
            Err(e @ PacketError::UnknownSource { sequence, .. }) => {
                debug!(%e, "audio packet will not be played");
                (sequence, None)
            }
            Err(e) => {
                debug!(%e, "discarding malformed audio packet");
                return;
            }
        };

        self.received += 1;
        if self.received % REPORT_EVERY == 0 {
            let elapsed = self.report_started.elapsed().as_secs_f64();
            let stats = self.reorder.stats();
            info!(
                received = self.received,
                rate = REPORT_EVERY as f64 / elapsed.max(f64::EPSILON),
                skipped = stats.skipped,
                evicted = stats.evicted,
                late = stats.late,
                "audio receiver throughput"
            );
            self.report_started = Instant::now();
        }

        let mode = self.mode;
        let queue = &self.queue;
        self.reorder.on_packet(sequence, packet, |_, packet| {
            if let Some(packet) = packet.filter(|_| mode.is_streaming()) {
                queue.push(packet.payload);
            }
        });
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }
}

/// Pull reordered chunks, apply the current muting and play them.
///
/// The output device is opened here and reopened with backoff after an
/// open or write failure. Runs until aborted.
pub async fn run_playback<B: AudioBackend>(
    backend: Arc<B>,
    queue: Arc<PlaybackQueue>,
    routing_rx: watch::Receiver<Routing>,
) -> Result<()> {
    let mut sink: Option<B::Playback> = None;
    let mut failures = 0u32;

    loop {
        let Some(out) = sink.as_mut() else {
            match backend.open_playback().await {
                Ok(opened) => {
                    if failures > 0 {
                        info!(failures, "playback device reopened");
                    } else {
                        info!("playback started");
                    }
                    sink = Some(opened);
                }
                Err(e) => {
                    failures += 1;
                    let delay = backoff(failures);
                    if failures == 1 {
                        warn!(%e, ?delay, "no playback device, retrying");
                    } else {
                        debug!(%e, failures, ?delay, "playback device still unavailable");
                    }
                    tokio::time::sleep(delay).await;
                }
            }
            continue;
        };

        let mut chunk = queue.next().await;
        let routing = *routing_rx.borrow();

        if !routing.mode.is_streaming() {
            continue;
        }

        apply_muting(&mut chunk, routing.muting);
        match out.write(&chunk).await {
            Ok(()) => failures = 0,
            Err(e) => {
                sink = None;
                failures += 1;
                let delay = backoff(failures);
                warn!(%e, ?delay, "playback write failed, reopening device");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
