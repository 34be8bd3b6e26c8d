//! tripsync collaboration server binary.
//!
//! Configuration via environment:
//! - `TRIPSYNC_ADDR` — bind address (default 127.0.0.1:9090)
//! - `TRIPSYNC_DATA` — RocksDB directory; unset runs in-memory

use tripsync_collab::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig {
        bind_addr: std::env::var("TRIPSYNC_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9090".to_string()),
        storage_path: std::env::var("TRIPSYNC_DATA").ok().map(Into::into),
    };

    let server = CollabServer::new(config)?;
    server.run().await
}
