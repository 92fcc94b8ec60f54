//! Process lifecycle

mod backoff;
mod shutdown;

pub use backoff::backoff;
pub use shutdown::ShutdownSignal;
