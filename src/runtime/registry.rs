//! Registry of live connections.
//!
//! Connections live in a slab whose keys double as multiplexer tokens,
//! giving O(1) lookup from a readiness event. A separate insertion-order
//! list keeps broadcast fan-out deterministic even though slab slots are
//! reused.

use crate::config::FramingMode;
use crate::runtime::connection::{Connection, NicknameAllocator};
use crate::runtime::framing::FrameDecoder;
use crate::runtime::multiplexer::Multiplexer;
use bytes::{BufMut, Bytes, BytesMut};
use mio::event::Source;
use mio::Token;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::debug;

const NICK_SEPARATOR: &[u8] = b": ";

pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    /// Live keys in insertion order.
    order: Vec<usize>,
    nicknames: NicknameAllocator,
    framing: FramingMode,
    max_line_length: usize,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S>
where
    S: Read + Write + Source,
{
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize, framing: FramingMode, max_line_length: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            order: Vec::new(),
            nicknames: NicknameAllocator::default(),
            framing,
            max_line_length,
            max_connections,
        }
    }

    /// Wrap `stream` in a connection, register it read-only and track it.
    ///
    /// Returns the connection id (also its token).
    pub fn add(&mut self, stream: S, peer: SocketAddr, mux: &Multiplexer) -> io::Result<usize> {
        if self.is_full() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "connection limit reached",
            ));
        }

        let entry = self.connections.vacant_entry();
        let id = entry.key();
        let conn = Connection::open(
            stream,
            Token(id),
            peer,
            self.nicknames.allocate(),
            FrameDecoder::new(self.framing, self.max_line_length),
            mux,
        )?;
        entry.insert(conn);
        self.order.push(id);
        Ok(id)
    }

    /// Forget a connection without touching its socket registration.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        let conn = self.connections.try_remove(id)?;
        self.order.retain(|&live| live != id);
        Some(conn)
    }

    /// Clean up a connection: deregister, drop queued output, forget it.
    /// The socket closes when the connection is dropped here.
    ///
    /// Returns `false` if it was already gone.
    pub fn close(&mut self, id: usize, mux: &Multiplexer) -> bool {
        match self.remove(id) {
            Some(mut conn) => conn.close(mux),
            None => false,
        }
    }

    /// Close every live connection.
    pub fn close_all(&mut self, mux: &Multiplexer) {
        for id in std::mem::take(&mut self.order) {
            if let Some(mut conn) = self.connections.try_remove(id) {
                conn.close(mux);
            }
        }
    }

    /// Send `payload` to every live connection except `from`, prefixed with
    /// the sender's current nickname.
    ///
    /// Peers whose write fails are closed. Returns how many peers the
    /// message was handed to.
    pub fn broadcast_but(&mut self, payload: &[u8], from: usize, mux: &Multiplexer) -> usize {
        let Some(sender) = self.connections.get(from) else {
            return 0;
        };

        let nickname = sender.nickname();
        let mut msg = BytesMut::with_capacity(nickname.len() + NICK_SEPARATOR.len() + payload.len());
        msg.put_slice(nickname.as_bytes());
        msg.put_slice(NICK_SEPARATOR);
        msg.put_slice(payload);
        let msg: Bytes = msg.freeze();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for &id in &self.order {
            if id == from {
                continue;
            }
            let conn = &mut self.connections[id];
            match conn.write(msg.clone(), mux) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(conn_id = id, error = %e, "Broadcast write failed");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.close(id, mux);
        }
        delivered
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn get(&self, id: usize) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Live connection ids in fan-out order.
    #[cfg(test)]
    pub fn ids(&self) -> &[usize] {
        &self.order
    }
}
