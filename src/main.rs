//! framehub server binary.
//!
//! Usage: `framehub [PORT] [WORKERS]` (defaults: port 8888, 4 workers).
//! SIGINT/SIGTERM request a graceful shutdown: the reactor closes every
//! connection, the reaper and workers are joined, and the process exits 0.

use framehub::{Config, Server};
use signal_hook::consts::{SIGINT, SIGTERM};
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

    info!(
        port = config.port,
        workers = config.workers,
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        "Starting framehub server"
    );

    let server = Server::new(&config)?;
    server.start()?;

    // SIGINT/SIGTERM raise the shutdown flag; run() notices within a
    // poll tick and unwinds gracefully.
    signal_hook::flag::register(SIGINT, server.shutdown_flag())?;
    signal_hook::flag::register(SIGTERM, server.shutdown_flag())?;

    server.run();

    Ok(())
}
