//! Audio link between the paired devices
//!
//! Sequenced UDP packets carry PCM from the mic chosen by the current mode;
//! the receiving side reorders them, applies channel muting and plays them.

mod device;
mod host;
mod packet;
mod playback;
mod receiver;
mod reorder;
mod sender;
#[cfg(test)]
mod testing;

pub use host::CpalBackend;
pub use packet::MicSource;
pub use playback::PlaybackQueue;
pub use receiver::{run_playback, AudioReceiver};
pub use sender::AudioSender;
