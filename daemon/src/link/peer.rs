//! Peer control link
//!
//! Sends heartbeats and local readings to the paired device, turns its
//! messages into remote state updates, and declares it disconnected once it
//! has been silent for longer than the connection timeout.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::state::{LocalState, Orientation, Snapshot, StateUpdate};

use super::protocol::ControlMessage;

/// How often the connection timeout is evaluated
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks peer liveness from message arrival times
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    timeout: Duration,
    last_seen: Option<Instant>,
    connected: bool,
}

impl ConnectionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: None,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Record a message; returns `true` if this connected the peer
    pub fn on_message(&mut self, now: Instant) -> bool {
        self.last_seen = Some(now);
        let edge = !self.connected;
        self.connected = true;
        edge
    }

    /// Returns `true` if the peer just timed out
    pub fn check(&mut self, now: Instant) -> bool {
        match self.last_seen {
            Some(seen) if self.connected && now.saturating_duration_since(seen) > self.timeout => {
                self.connected = false;
                true
            }
            _ => false,
        }
    }
}

/// Control link to the paired device
pub struct PeerLink {
    socket: UdpSocket,
    peer: SocketAddr,
    tracker: ConnectionTracker,
    heartbeat_interval: Duration,
    update_tx: mpsc::Sender<StateUpdate>,
    /// Latest local reading and whether the peer has seen it
    local: Option<LocalState>,
    local_sent: bool,
}

impl PeerLink {
    pub fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        heartbeat_interval: Duration,
        connection_timeout: Duration,
        update_tx: mpsc::Sender<StateUpdate>,
    ) -> Self {
        Self {
            socket,
            peer,
            tracker: ConnectionTracker::new(connection_timeout),
            heartbeat_interval,
            update_tx,
            local: None,
            local_sent: false,
        }
    }

    /// Bind the control port on all interfaces
    pub async fn bind(
        port: u16,
        peer: SocketAddr,
        heartbeat_interval: Duration,
        connection_timeout: Duration,
        update_tx: mpsc::Sender<StateUpdate>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind control port {port}"))?;
        info!(port, %peer, "peer link listening");
        Ok(Self::new(socket, peer, heartbeat_interval, connection_timeout, update_tx))
    }

    /// Run until the state machine goes away
    pub async fn run(mut self, mut snapshots: watch::Receiver<Snapshot>) -> Result<()> {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monitor = tokio::time::interval(MONITOR_INTERVAL);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 1024];

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.send(ControlMessage::Heartbeat).await;
                    // Repeat the reading so a lost datagram heals itself.
                    self.local_sent = false;
                    self.flush_local().await;
                }
                _ = monitor.tick() => {
                    if self.tracker.check(Instant::now()) {
                        warn!(timeout_ms = self.tracker.timeout.as_millis() as u64, "peer timed out");
                        self.publish(StateUpdate::Connection(false)).await?;
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let local = snapshots.borrow_and_update().state.local;
                    self.forward_local(local).await;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await?,
                        Err(e) => {
                            debug!(?e, "control receive error");
                        }
                    }
                }
            }
        }

        info!("peer link stopped");
        Ok(())
    }

    async fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Result<()> {
        if from.ip() != self.peer.ip() {
            debug!(%from, "ignoring control message from unknown host");
            return Ok(());
        }

        let message = match ControlMessage::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                debug!(%e, "discarding malformed control message");
                return Ok(());
            }
        };
        trace!(?message, "control message");

        if self.tracker.on_message(Instant::now()) {
            info!(%from, "peer connected");
            self.publish(StateUpdate::Connection(true)).await?;
            self.local_sent = false;
            self.flush_local().await;
        }

        if let ControlMessage::Orientation { y, z, pressure } = message {
            self.publish(StateUpdate::Remote {
                orientation: Orientation { y, z },
                pressure,
            })
            .await?;
        }

        Ok(())
    }

    async fn forward_local(&mut self, local: LocalState) {
        let changed = self.local.map_or(true, |prev| {
            prev.orientation != local.orientation || prev.pressure != local.pressure
        });
        if changed {
            self.local = Some(local);
            self.local_sent = false;
        }
        self.flush_local().await;
    }

    async fn flush_local(&mut self) {
        let Some(local) = self.local else {
            return;
        };
        if self.local_sent || !self.tracker.is_connected() {
            return;
        }

        self.local_sent = true;
        self.send(ControlMessage::reading(local.orientation, local.pressure))
            .await;
    }

    async fn send(&self, message: ControlMessage) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%e, "failed to encode control message");
                return;
            }
        };

        // The peer being down is routine; it shows up as a timeout instead.
        if let Err(e) = self.socket.send_to(&bytes, self.peer).await {
            trace!(?e, "control send failed");
        }
    }

    async fn publish(&self, update: StateUpdate) -> Result<()> {
        self.update_tx
            .send(update)
            .await
            .context("state machine channel closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_connects_on_first_message() {
        let start = Instant::now();
        let mut tracker = ConnectionTracker::new(Duration::from_secs(7));
        assert!(!tracker.is_connected());
        assert!(tracker.on_message(start));
        assert!(!tracker.on_message(start + Duration::from_secs(1)));
        assert!(tracker.is_connected());
    }

    #[test]
    fn test_tracker_times_out() {
        let start = Instant::now();
        let mut tracker = ConnectionTracker::new(Duration::from_secs(7));
        tracker.on_message(start);

        assert!(!tracker.check(start + Duration::from_secs(7)));
        assert!(tracker.check(start + Duration::from_secs(8)));
        assert!(!tracker.is_connected());
        // Only one edge per outage.
        assert!(!tracker.check(start + Duration::from_secs(9)));
    }

    #[test]
    fn test_tracker_never_seen_stays_disconnected() {
        let mut tracker = ConnectionTracker::new(Duration::from_secs(1));
        assert!(!tracker.check(Instant::now() + Duration::from_secs(60)));
    }

    async fn link_pair() -> (PeerLink, UdpSocket, mpsc::Receiver<StateUpdate>) {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let link = PeerLink::new(
            socket,
            remote.local_addr().unwrap(),
            Duration::from_millis(50),
            Duration::from_secs(7),
            tx,
        );
        (link, remote, rx)
    }

    #[tokio::test]
    async fn test_remote_reading_becomes_update() {
        let (link, remote, mut updates) = link_pair().await;
        let addr = link.socket.local_addr().unwrap();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let task = tokio::spawn(link.run(snapshot_rx));

        let msg = ControlMessage::Orientation {
            y: 15,
            z: -2,
            pressure: true,
        };
        remote.send_to(&msg.encode().unwrap(), addr).await.unwrap();

        assert_eq!(updates.recv().await, Some(StateUpdate::Connection(true)));
        assert_eq!(
            updates.recv().await,
            Some(StateUpdate::Remote {
                orientation: Orientation { y: 15, z: -2 },
                pressure: true,
            })
        );

        drop(snapshot_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sends_heartbeats() {
        let (link, remote, _updates) = link_pair().await;
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let task = tokio::spawn(link.run(snapshot_rx));

        let mut buf = [0u8; 256];
        let len = tokio::time::timeout(Duration::from_secs(2), remote.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ControlMessage::decode(&buf[..len]).unwrap(),
            ControlMessage::Heartbeat
        );

        drop(snapshot_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_forwards_local_reading_once_connected() {
        let (mut link, remote, _updates) = link_pair().await;
        let local = LocalState {
            orientation: Orientation { y: 4, z: 5 },
            pressure: true,
            moving: false,
        };

        // Not connected yet: nothing is sent.
        link.forward_local(local).await;
        assert!(!link.local_sent);

        link.tracker.on_message(Instant::now());
        link.flush_local().await;
        assert!(link.local_sent);

        let mut buf = [0u8; 256];
        let len = remote.recv(&mut buf).await.unwrap();
        assert_eq!(
            ControlMessage::decode(&buf[..len]).unwrap(),
            ControlMessage::reading(Orientation { y: 4, z: 5 }, true)
        );
    }
}
