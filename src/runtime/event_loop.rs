//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread owns everything: the multiplexer, the listener and the
//! connection registry. Nothing here is shared, so nothing is locked.
//!
//! ## Readiness handling
//!
//! mio notifications are edge-triggered, so every handler works until the
//! socket reports `WouldBlock`: the listener accepts until empty, reads
//! drain the socket, and write-drains stop only when the kernel buffer is
//! full. Connection events are handed to the `Relay`.

use crate::config::Config;
use crate::runtime::listener::Listener;
use crate::runtime::multiplexer::{Multiplexer, Readiness};
use crate::runtime::relay::Relay;
use crate::runtime::shutdown::ShutdownHandle;
use mio::net::TcpStream;
use mio::Token;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

pub struct EventLoop {
    mux: Multiplexer,
    listener: Listener,
    relay: Relay<TcpStream>,
    shutdown: ShutdownHandle,
    event_capacity: usize,
}

impl EventLoop {
    /// Bind the listener and set up the multiplexer.
    pub fn new(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mux = Multiplexer::new(config.event_capacity)?;
        let mut listener = Listener::bind(addr, config.backlog)?;
        listener.register(&mux, LISTENER_TOKEN)?;
        let shutdown = ShutdownHandle::new(mux.waker(WAKER_TOKEN)?);

        info!(
            addr = %listener.local_addr()?,
            backlog = config.backlog,
            framing = ?config.framing,
            max_connections = config.max_connections,
            "Listening"
        );

        Ok(Self {
            mux,
            listener,
            relay: Relay::new(
                config.max_connections,
                config.framing,
                config.max_line_length,
                config.read_chunk_size,
            ),
            shutdown,
            event_capacity: config.event_capacity,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops the loop from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shutdown is requested, then close every connection and
    /// release the multiplexer.
    pub fn run(mut self) -> io::Result<()> {
        let mut ready: Vec<Readiness> = Vec::with_capacity(self.event_capacity);
        loop {
            self.mux.poll(&mut ready)?;
            for &readiness in &ready {
                match readiness.token {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => {
                        if self.shutdown.is_requested() {
                            return self.shut_down();
                        }
                    }
                    Token(conn_id) => {
                        self.relay
                            .handle_connection_event(conn_id, readiness, &self.mux)
                    }
                }
            }
        }
    }

    fn shut_down(mut self) -> io::Result<()> {
        info!(connections = self.relay.registry().len(), "Shutting down");
        self.relay.registry_mut().close_all(&self.mux);
        if let Err(e) = self.listener.deregister(&self.mux) {
            debug!(error = %e, "Listener deregister failed");
        }
        drop(self.mux);
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some((stream, peer))) => {
                    let registry = self.relay.registry_mut();
                    if registry.is_full() {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }
                    match registry.add(stream, peer, &self.mux) {
                        Ok(conn_id) => {
                            let nick = registry
                                .get(conn_id)
                                .map(|c| c.nickname().to_string())
                                .unwrap_or_default();
                            info!(conn_id, peer = %peer, nick = %nick, "Accepted connection");
                        }
                        Err(e) => warn!(peer = %peer, error = %e, "Failed to register connection"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }
}
