//! Remote side of a webshell session: accepts WebSocket connections and
//! relays each one to a freshly spawned shell on a pseudo-terminal.

pub mod config;
pub mod process;
pub mod relay;
pub mod server;

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },
}
