//! jsonframe-server: answers framed JSON translation requests.
//!
//! Usage: `jsonframe-server <host> <port> [--config FILE]`
//!
//! Runs a single-threaded mio dispatch loop until Ctrl-C.

use jsonframe::config::Config;
use jsonframe::{Server, Translator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let addr = config.socket_addr()?;
    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.settings.max_connections,
        translations = config.table.len(),
        "Starting jsonframe server"
    );

    let service = Arc::new(Translator::new(Arc::new(config.table)));
    let mut server = Server::bind(addr, config.settings, service)?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Interrupted, shutting down");
        shutdown.shutdown();
    })?;

    server.run()?;
    Ok(())
}
