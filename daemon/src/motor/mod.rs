//! Orientation matching for the local mount

mod driver;
mod matcher;

pub use driver::{run_motor, SerialMotor};
pub use matcher::OrientationMatcher;
