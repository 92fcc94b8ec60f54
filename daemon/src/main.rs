//! blanc-daemon: paired-installation audio and orientation daemon
//!
//! Each of the two installation devices runs one daemon. It provides:
//! - Pressure and orientation polling from the local sensor board
//! - A control link carrying heartbeats and readings to the paired device
//! - A state machine deciding which microphone streams and what is muted
//! - Sequenced UDP audio with a bounded reorder buffer on receive
//! - Motor matching of the remote orientation
//! - A local status socket

mod audio;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod link;
mod motor;
mod sensor;
mod state;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{run_playback, AudioReceiver, AudioSender, CpalBackend, PlaybackQueue};
use crate::config::Config;
use crate::events::StateEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::link::PeerLink;
use crate::motor::{run_motor, OrientationMatcher, SerialMotor};
use crate::sensor::{run_sensor_poller, SerialLink, REPLY_TIMEOUT};
use crate::state::{StateMachine, StateUpdate};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "blanc-daemon starting");

    let config = Config::load()?;
    config
        .ensure_dirs()
        .context("failed to create data directory")?;
    info!(
        remote = %config.remote_host,
        audio_port = config.audio_port,
        control_port = config.control_port,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Sensors, peer link, motor -> state machine
    let (update_tx, update_rx) = mpsc::channel::<StateUpdate>(64);
    // State machine -> status socket subscribers and the motor task's reports
    let (event_tx, _) = broadcast::channel::<StateEvent>(64);

    let mut state_machine = StateMachine::new(config.mute, event_tx.clone());
    let snapshots = state_machine.snapshots();
    let routing = state_machine.routing_updates();

    let mut tasks = JoinSet::new();

    let peer = PeerLink::bind(
        config.control_port,
        config.remote_control_addr(),
        config.heartbeat_interval,
        config.connection_timeout,
        update_tx.clone(),
    )
    .await?;
    spawn_task(&mut tasks, "peer link", peer.run(snapshots.clone()));

    match SerialLink::open(&config.serial_port, config.serial_baud, REPLY_TIMEOUT) {
        Ok(link) => {
            let link = Arc::new(Mutex::new(link));
            spawn_task(
                &mut tasks,
                "sensor poller",
                run_sensor_poller(link.clone(), snapshots.clone(), update_tx.clone()),
            );
            spawn_task(
                &mut tasks,
                "motor",
                run_motor(
                    SerialMotor::new(link),
                    OrientationMatcher::new(config.hold_duration),
                    snapshots.clone(),
                    update_tx.clone(),
                    event_tx.clone(),
                ),
            );
        }
        Err(e) => {
            error!(%e, "sensor board unavailable");
            warn!("continuing without pressure sensing or motors");
        }
    }
    drop(update_tx);

    let backend = Arc::new(CpalBackend::new());
    let queue = Arc::new(PlaybackQueue::new(config.playback_queue));
    let receiver =
        AudioReceiver::bind(config.audio_port, config.reorder_capacity, queue.clone()).await?;
    spawn_task(&mut tasks, "audio receiver", receiver.run(routing.clone()));

    spawn_task(
        &mut tasks,
        "playback",
        run_playback(backend.clone(), queue, routing.clone()),
    );

    let send_socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .context("failed to bind audio send socket")?;
    let sender = AudioSender::new(
        backend,
        send_socket,
        config.remote_audio_addr(),
        config.personal_mic.clone(),
        config.global_mic.clone(),
    );
    spawn_task(&mut tasks, "audio sender", sender.run(routing));

    let server = Server::bind(&config.socket_path, snapshots, event_tx.clone())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = state_machine.run(update_rx) => {
            info!("state machine exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "status socket error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    tasks.shutdown().await;
    server.shutdown().await;

    info!("blanc-daemon stopped");

    Ok(())
}

/// Run a daemon task, logging how it ended
fn spawn_task<F>(tasks: &mut JoinSet<()>, name: &'static str, task: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        match task.await {
            Ok(()) => info!(task = name, "task finished"),
            Err(e) => error!(task = name, error = ?e, "task failed"),
        }
    });
}
