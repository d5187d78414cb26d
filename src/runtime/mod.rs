//! Custom runtime for the chat relay.
//!
//! A single-threaded readiness event loop on top of mio:
//! - `Multiplexer`: owns the poll instance and reports readiness batches
//! - `Listener`: accepts new TCP connections
//! - `Connection`: per-client read/write state machine with a write backlog
//! - `ConnectionRegistry`: live connections and broadcast fan-out
//! - `Relay`: per-connection reads, message dispatch and write drains
//! - `EventLoop`: routes readiness events and drives shutdown

mod connection;
mod event_loop;
mod framing;
mod listener;
mod multiplexer;
mod registry;
mod relay;
mod shutdown;

pub use event_loop::EventLoop;
pub use shutdown::spawn_signal_listener;

use crate::config::Config;
use tracing::info;

/// Run the server until an interrupt or terminate signal arrives.
pub fn run(config: Config) -> std::io::Result<()> {
    let event_loop = EventLoop::new(&config)?;
    spawn_signal_listener(event_loop.shutdown_handle())?;
    event_loop.run()?;
    info!("Event loop stopped");
    Ok(())
}
