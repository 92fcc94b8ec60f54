//! Decides when the local mount should follow the remote orientation
//!
//! A visitor alone on the local plate, held for at least the hold duration,
//! sees the mount turn to where the remote device is pointing. The target is
//! re-evaluated every hold period while the conditions last.

use std::time::{Duration, Instant};

use crate::state::{Orientation, SystemState};

#[derive(Debug, Clone)]
pub struct OrientationMatcher {
    hold: Duration,
    held_since: Option<Instant>,
    last_target: Option<Orientation>,
}

impl OrientationMatcher {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            held_since: None,
            last_target: None,
        }
    }

    /// Returns a motor target when one is due
    pub fn tick(&mut self, now: Instant, state: &SystemState) -> Option<Orientation> {
        if !state.local.pressure {
            self.held_since = None;
            return None;
        }

        let since = *self.held_since.get_or_insert(now);
        if now.saturating_duration_since(since) < self.hold {
            return None;
        }
        // Re-arm for the next hold period.
        self.held_since = Some(now);

        if state.remote.pressure || !state.remote.connected {
            return None;
        }

        let target = state.remote.orientation;
        if self.last_target == Some(target) {
            return None;
        }
        self.last_target = Some(target);
        Some(target)
    }

    /// Forget the last target so it is sent again
    pub fn reset_target(&mut self) {
        self.last_target = None;
    }
}
