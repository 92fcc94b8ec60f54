//! Local sensor board: pressure plate and orientation

mod poller;
mod reading;
mod serial;

pub use poller::run_sensor_poller;
pub use serial::{SerialLink, DEFAULT_BAUD, REPLY_TIMEOUT};

/// Errors talking to the sensor board
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply from sensor board")]
    Timeout,

    #[error("sensor board closed the link")]
    Closed,

    #[error("unparseable reply {line:?}: {reason}")]
    Parse { line: String, reason: String },
}
