//! chatmux: a TCP chat relay
//!
//! Clients connect, send text, and every message is relayed to all other
//! connected clients prefixed with the sender's nickname.
//!
//! Features:
//! - Single-threaded readiness event loop (epoll/kqueue via mio)
//! - Per-connection write backlog under backpressure
//! - `/nick <name>` to change the displayed nickname
//! - Newline or raw framing
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod runtime;

use config::Config;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status after an orderly signal-driven shutdown.
const SHUTDOWN_EXIT_CODE: u8 = 1;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
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
        listen = %config.listen,
        framing = ?config.framing,
        max_connections = config.max_connections,
        read_chunk_size = config.read_chunk_size,
        "Starting chatmux server"
    );

    runtime::run(config)?;
    info!("Server stopped");
    Ok(ExitCode::from(SHUTDOWN_EXIT_CODE))
}
