//! Motor driver and the task that feeds it targets

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::events::StateEvent;
use crate::sensor::{SensorError, SerialLink};
use crate::state::{Orientation, Snapshot, StateUpdate};

use super::matcher::OrientationMatcher;

/// How often the matcher is evaluated
pub const MATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Time the board needs to finish stepping after a command
pub const SETTLE_TIME: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("motor command failed: {0}")]
    Link(#[from] SensorError),
}

/// Something that can turn the mount
pub trait MotorDriver: Send + Sync + 'static {
    fn move_to(&self, target: Orientation) -> impl Future<Output = Result<(), MotorError>> + Send;
}

/// Motors driven over the shared sensor serial line
pub struct SerialMotor<S> {
    link: Arc<Mutex<SerialLink<S>>>,
    settle: Duration,
}

impl<S> SerialMotor<S> {
    pub fn new(link: Arc<Mutex<SerialLink<S>>>) -> Self {
        Self {
            link,
            settle: SETTLE_TIME,
        }
    }
}

impl<S> MotorDriver for SerialMotor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn move_to(&self, target: Orientation) -> Result<(), MotorError> {
        // Hold the line through the settle time so no poll interrupts the move.
        let mut link = self.link.lock().await;
        link.send_orientation(target).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

/// Turn the mount toward the remote orientation whenever the matcher asks
pub async fn run_motor<D: MotorDriver>(
    driver: D,
    mut matcher: OrientationMatcher,
    mut snapshots: watch::Receiver<Snapshot>,
    update_tx: mpsc::Sender<StateUpdate>,
    event_tx: broadcast::Sender<StateEvent>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(MATCH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let state = snapshots.borrow_and_update().state;
        let Some(target) = matcher.tick(Instant::now(), &state) else {
            continue;
        };

        info!(y = target.y, z = target.z, "matching remote orientation");
        update_tx
            .send(StateUpdate::Moving(true))
            .await
            .context("state machine channel closed")?;
        let _ = event_tx.send(StateEvent::MotorStarted { target });

        let outcome = driver.move_to(target).await;

        update_tx
            .send(StateUpdate::Moving(false))
            .await
            .context("state machine channel closed")?;

        match outcome {
            Ok(()) => {
                let _ = event_tx.send(StateEvent::MotorSettled);
            }
            Err(e) => {
                warn!(%e, "motor move failed");
                matcher.reset_target();
                let _ = event_tx.send(StateEvent::MotorFailed {
                    message: e.to_string(),
                });
            }
        }
    }
}
