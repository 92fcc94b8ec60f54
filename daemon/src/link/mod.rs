//! Control link to the paired device

mod peer;
mod protocol;

pub use peer::PeerLink;
