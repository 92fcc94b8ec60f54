//! Core state machine implementation
//!
//! Applies sensor, peer and motor updates to the system state and derives
//! the streaming mode after every change. The machine is the single writer
//! of the state: consumers read snapshots from a `watch` channel and react
//! to transitions via `broadcast` events.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::events::StateEvent;

use super::mode::{MuteConfig, Routing};
use super::system::{StateUpdate, SystemState};

/// Consistent view of state and the routing derived from it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SystemState,
    pub routing: Routing,
}

/// The state machine that owns the installation state
pub struct StateMachine {
    /// Current device state
    state: SystemState,
    /// Routing derived from `state`
    routing: Routing,
    /// Channels muted per mode
    mute: MuteConfig,
    /// Time when the current mode was entered
    mode_entered_at: Instant,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
    /// Latest snapshot for readers
    snapshot_tx: watch::Sender<Snapshot>,
    /// Routing, updated only on transitions
    routing_tx: watch::Sender<Routing>,
}

impl StateMachine {
    /// Create a new state machine
    pub fn new(mute: MuteConfig, event_tx: broadcast::Sender<StateEvent>) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let (routing_tx, _) = watch::channel(Routing::default());
        Self {
            state: SystemState::default(),
            routing: Routing::default(),
            mute,
            mode_entered_at: Instant::now(),
            event_tx,
            snapshot_tx,
            routing_tx,
        }
    }

    /// Receiver for state snapshots, updated on every change
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Receiver for routing, updated only when the routing changes
    pub fn routing_updates(&self) -> watch::Receiver<Routing> {
        self.routing_tx.subscribe()
    }

    #[cfg(test)]
    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Run the state machine, processing updates until all senders are gone
    pub async fn run(&mut self, mut update_rx: mpsc::Receiver<StateUpdate>) {
        info!(mode = %self.routing.mode, "state machine started");

        while let Some(update) = update_rx.recv().await {
            self.handle_update(update);
        }

        info!("state machine stopped");
    }

    /// Apply one update and publish whatever changed
    pub fn handle_update(&mut self, update: StateUpdate) {
        let before = self.state;
        self.state.apply(update);

        if self.state == before {
            return;
        }

        debug!(?update, "state updated");
        self.emit_edge_events(&before);

        let routing = Routing::decide(
            self.state.local.pressure,
            self.state.remote.pressure,
            self.state.remote.connected,
            &self.mute,
        );

        if routing != self.routing {
            self.transition_to(routing);
        }

        self.snapshot_tx.send_replace(Snapshot {
            state: self.state,
            routing: self.routing,
        });
    }

    /// Emit pressure and connectivity edges
    fn emit_edge_events(&self, before: &SystemState) {
        let now = &self.state;

        if now.local.pressure != before.local.pressure {
            self.emit(StateEvent::LocalPressureChanged {
                pressure: now.local.pressure,
            });
        }
        if now.remote.pressure != before.remote.pressure {
            self.emit(StateEvent::RemotePressureChanged {
                pressure: now.remote.pressure,
            });
        }
        if now.remote.connected != before.remote.connected {
            self.emit(if now.remote.connected {
                StateEvent::PeerConnected
            } else {
                StateEvent::PeerDisconnected
            });
        }
    }

    /// Perform a routing transition
    fn transition_to(&mut self, routing: Routing) {
        let old = self.routing;
        let duration_ms = self.mode_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old.mode,
            to = %routing.mode,
            muting = %routing.muting,
            duration_ms = duration_ms,
            "mode transition"
        );

        self.routing = routing;
        self.routing_tx.send_replace(routing);
        if old.mode != routing.mode {
            self.mode_entered_at = Instant::now();
        }

        self.emit(StateEvent::ModeChanged {
            from: old.mode,
            to: routing.mode,
            muting: routing.muting,
            duration_ms,
        });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}
