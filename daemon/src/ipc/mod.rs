//! Local status socket

mod protocol;
mod server;

pub use server::Server;
