//! Listening socket.

use crate::runtime::multiplexer::Multiplexer;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use std::io;
use std::net::SocketAddr;
use tracing::debug;

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind a non-blocking listener with the given backlog.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        let listener: std::net::TcpListener = socket.into();
        Ok(Self {
            inner: TcpListener::from_std(listener),
        })
    }

    pub fn register(&mut self, mux: &Multiplexer, token: Token) -> io::Result<()> {
        mux.register(&mut self.inner, token, Interest::READABLE)
    }

    pub fn deregister(&mut self, mux: &Multiplexer) -> io::Result<()> {
        mux.unregister(&mut self.inner)
    }

    /// Accept one pending connection, or `None` if none is waiting.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    return Ok(Some((stream, peer)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
