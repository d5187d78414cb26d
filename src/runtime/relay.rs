//! Per-connection event handling.
//!
//! `Relay` owns the connection registry and the receive buffers, and turns
//! a readiness notification for one connection into reads, message
//! dispatch and write drains. It is generic over the transport so the
//! same routing runs against mio sockets and in-memory streams.
//!
//! ## Read/write tie-break
//!
//! When one event carries both read and write readiness the read path runs
//! first; anything it queues for the sender lands behind the existing
//! backlog. The write drain then runs in the same event if the connection
//! survived the read. mio is edge-triggered, so skipping the write half
//! would strand queued output until some later edge.

use crate::config::FramingMode;
use crate::protocol::{self, Message, UNSUPPORTED_REPLY};
use crate::runtime::connection::ReadOutcome;
use crate::runtime::multiplexer::{Multiplexer, Readiness};
use crate::runtime::registry::ConnectionRegistry;
use bytes::Bytes;
use mio::event::Source;
use std::io::{self, Read, Write};
use tracing::{debug, info, trace};

pub struct Relay<S> {
    registry: ConnectionRegistry<S>,
    /// Receive buffer shared by all connections.
    scratch: Vec<u8>,
    /// Frames decoded from the current receive, reused between receives.
    frames: Vec<Bytes>,
}

impl<S> Relay<S>
where
    S: Read + Write + Source,
{
    pub fn new(
        max_connections: usize,
        framing: FramingMode,
        max_line_length: usize,
        read_chunk_size: usize,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(max_connections, framing, max_line_length),
            scratch: vec![0u8; read_chunk_size],
            frames: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConnectionRegistry<S> {
        &mut self.registry
    }

    /// Read first, then drain writes if the connection is still live.
    /// Any failure closes only this connection.
    pub fn handle_connection_event(
        &mut self,
        conn_id: usize,
        readiness: Readiness,
        mux: &Multiplexer,
    ) {
        if readiness.readable {
            if let Err(e) = self.handle_readable(conn_id, mux) {
                debug!(conn_id, error = %e, "Connection error");
                self.registry.close(conn_id, mux);
                return;
            }
        }

        // Re-check connection exists (may have been removed)
        if readiness.writable {
            if let Some(conn) = self.registry.get_mut(conn_id) {
                match conn.flush(mux) {
                    Ok(()) => trace!(
                        conn_id,
                        state = ?conn.state(),
                        pending = conn.pending_len(),
                        "Write drain"
                    ),
                    Err(e) => {
                        debug!(conn_id, error = %e, "Connection error");
                        self.registry.close(conn_id, mux);
                    }
                }
            }
        }
    }

    /// Receive chunk by chunk until the socket would block, dispatching the
    /// frames of each chunk before the next receive.
    ///
    /// Peer close is not an error: it yields `Ok` after cleanup.
    fn handle_readable(&mut self, conn_id: usize, mux: &Multiplexer) -> io::Result<()> {
        loop {
            let Some(conn) = self.registry.get_mut(conn_id) else {
                return Ok(());
            };
            let outcome = conn.read(&mut self.scratch, &mut self.frames);

            let mut frames = std::mem::take(&mut self.frames);
            let dispatched = frames
                .drain(..)
                .try_for_each(|frame| self.dispatch(conn_id, frame, mux));
            self.frames = frames;
            dispatched?;

            match outcome {
                ReadOutcome::Received => continue,
                ReadOutcome::Drained => return Ok(()),
                ReadOutcome::PeerClosed => {
                    self.registry.close(conn_id, mux);
                    return Ok(());
                }
                ReadOutcome::Failed(e) => return Err(e),
            }
        }
    }

    /// Route one inbound message: commands act on the sender, chat text is
    /// relayed to everyone else.
    fn dispatch(&mut self, conn_id: usize, frame: Bytes, mux: &Multiplexer) -> io::Result<()> {
        let text = std::str::from_utf8(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        match protocol::parse(text) {
            Message::Chat => {
                self.registry.broadcast_but(&frame, conn_id, mux);
            }
            Message::Nick(name) => {
                if let Some(conn) = self.registry.get_mut(conn_id) {
                    info!(
                        conn_id,
                        peer = %conn.peer(),
                        from = %conn.nickname(),
                        to = %name,
                        "Nickname changed"
                    );
                    conn.set_nickname(name);
                }
            }
            Message::MalformedNick => {
                debug!(conn_id, "Ignoring malformed /nick");
            }
            Message::Unsupported(command) => {
                debug!(conn_id, command, "Unsupported command");
                if let Some(conn) = self.registry.get_mut(conn_id) {
                    conn.write(Bytes::from_static(UNSUPPORTED_REPLY), mux)?;
                }
            }
        }
        Ok(())
    }
}
