//! State machine module for mode management
//!
//! Tracks local and remote pressure plus peer connectivity and derives one
//! of three streaming modes from them:
//! - None: nothing streamed, playback silenced
//! - Personal: personal mic streamed, personal channel muted
//! - Global: room mic streamed, global channel muted

mod machine;
mod mode;
mod system;

pub use machine::{Snapshot, StateMachine};
pub use mode::{MuteConfig, Muting, Routing, StreamMode};
pub use system::{LocalState, Orientation, RemoteState, StateUpdate, SystemState};
