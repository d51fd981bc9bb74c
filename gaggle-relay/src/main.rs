//! Gaggle Relay — stateless WebSocket relay for idea-graph rooms.
//!
//! Configured through `GAGGLE_RELAY_ADDR` and `GAGGLE_BROADCAST_CAPACITY`;
//! `RUST_LOG` controls verbosity.

use std::error::Error;

use gaggle_collab::server::{RelayServer, ServerConfig};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting Gaggle Relay on {} (broadcast capacity {})...",
        config.bind_addr, config.broadcast_capacity
    );

    RelayServer::new(config).run().await
}
