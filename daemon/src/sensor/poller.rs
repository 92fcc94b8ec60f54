//! Periodic sensor polling

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::lifecycle::backoff;
use crate::state::{Snapshot, StateUpdate};

use super::serial::SerialLink;

/// Poll period, roughly 30 Hz
pub const POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Poll the board and publish local readings. Polling pauses while the
/// motor is moving because the board is busy stepping.
pub async fn run_sensor_poller<S>(
    link: Arc<Mutex<SerialLink<S>>>,
    mut snapshots: watch::Receiver<Snapshot>,
    update_tx: mpsc::Sender<StateUpdate>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send,
{
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures = 0u32;

    info!("sensor poller started");

    loop {
        ticker.tick().await;

        if snapshots.borrow_and_update().state.local.moving {
            continue;
        }

        let result = link.lock().await.request_reading().await;
        match result {
            Ok(reading) => {
                if failures > 0 {
                    info!(failures, "sensor board responding again");
                    failures = 0;
                }
                update_tx
                    .send(StateUpdate::Local {
                        orientation: reading.orientation,
                        pressure: reading.pressure,
                    })
                    .await
                    .context("state machine channel closed")?;
            }
            Err(e) => {
                failures += 1;
                let delay = backoff(failures);
                if failures == 1 {
                    warn!(%e, "sensor read failed");
                } else {
                    debug!(%e, failures, delay_ms = delay.as_millis() as u64, "sensor read failed");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
