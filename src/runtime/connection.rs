//! Connection state machine for managing TCP connections.
//!
//! A connection is `ReadOnly` while it has nothing queued for the peer and
//! `ReadWrite` while a backlog of unsent buffers exists; the multiplexer
//! interest always mirrors that state. `Closed` is terminal.
//!
//! Outbound data goes through `write`: it is sent immediately when the
//! queue is empty, otherwise appended so per-connection order is kept.
//! Whatever the socket does not accept is queued and drained by `flush`
//! on the next write-readiness event.

use crate::runtime::framing::FrameDecoder;
use crate::runtime::multiplexer::Multiplexer;
use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use mio::event::Source;
use mio::{Interest, Token};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Nothing pending; registered for reads only.
    ReadOnly,
    /// Pending writes; registered for reads and writes.
    ReadWrite,
    /// Deregistered; the socket is released when the connection is dropped.
    Closed,
}

impl ConnState {
    fn interest(self) -> Option<Interest> {
        match self {
            ConnState::ReadOnly => Some(Interest::READABLE),
            ConnState::ReadWrite => Some(Interest::READABLE | Interest::WRITABLE),
            ConnState::Closed => None,
        }
    }
}

/// How a single receive ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Data arrived; the socket may hold more.
    Received,
    /// The socket has no more data for now.
    Drained,
    /// The peer closed its side of the stream.
    PeerClosed,
    /// Transport or framing failure; the connection must be closed.
    Failed(io::Error),
}

/// Hands out default nicknames.
///
/// Counter based: unique within the process lifetime, but nothing stops a
/// client from picking the same name with `/nick`.
#[derive(Debug, Default)]
pub struct NicknameAllocator {
    next: u64,
}

impl NicknameAllocator {
    pub fn allocate(&mut self) -> String {
        self.next += 1;
        format!("{:06x}", self.next)
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    token: Token,
    peer: SocketAddr,
    nickname: String,
    state: ConnState,
    /// Unsent buffers, oldest first. The head may be a partially sent remainder.
    pending: VecDeque<Bytes>,
    decoder: FrameDecoder,
    connected_at: DateTime<Utc>,
}

impl<S> Connection<S>
where
    S: Read + Write + Source,
{
    /// Register `stream` for reads and wrap it.
    pub fn open(
        mut stream: S,
        token: Token,
        peer: SocketAddr,
        nickname: String,
        decoder: FrameDecoder,
        mux: &Multiplexer,
    ) -> io::Result<Self> {
        mux.register(&mut stream, token, Interest::READABLE)?;
        Ok(Self {
            stream,
            token,
            peer,
            nickname,
            state: ConnState::ReadOnly,
            pending: VecDeque::new(),
            decoder,
            connected_at: Utc::now(),
        })
    }

    /// Receive one chunk and append the frames it completes to `frames`.
    ///
    /// Callers dispatch those frames and call again until the outcome is
    /// anything but `Received`, so the socket is drained without holding
    /// more than one chunk of decoded input. On EOF the unterminated tail
    /// is appended as a final frame.
    pub fn read(&mut self, scratch: &mut [u8], frames: &mut Vec<Bytes>) -> ReadOutcome {
        if self.state == ConnState::Closed {
            return ReadOutcome::Drained;
        }

        loop {
            match self.stream.read(scratch) {
                Ok(0) => {
                    frames.extend(self.decoder.finish());
                    return ReadOutcome::PeerClosed;
                }
                Ok(n) => {
                    trace!(conn_id = self.token.0, bytes = n, "Read");
                    return match self.decoder.decode(&scratch[..n], frames) {
                        Ok(()) => ReadOutcome::Received,
                        Err(e) => ReadOutcome::Failed(e),
                    };
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Queue `buf` for the peer, sending as much as possible right away.
    pub fn write(&mut self, buf: Bytes, mux: &Multiplexer) -> io::Result<()> {
        match self.state {
            ConnState::Closed => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "connection closed",
                ))
            }
            ConnState::ReadWrite => {
                self.pending.push_back(buf);
                return Ok(());
            }
            ConnState::ReadOnly => {}
        }

        let rest = self.send(buf)?;
        if !rest.is_empty() {
            trace!(conn_id = self.token.0, queued = rest.len(), "Backpressure");
            self.pending.push_back(rest);
            self.transition(ConnState::ReadWrite, mux)?;
        }
        Ok(())
    }

    /// Flush queued buffers in order; drops back to `ReadOnly` once empty.
    ///
    /// A partially sent head buffer is kept as its remainder and later
    /// buffers are not touched until it completes.
    pub fn flush(&mut self, mux: &Multiplexer) -> io::Result<()> {
        if self.state != ConnState::ReadWrite {
            return Ok(());
        }

        while let Some(buf) = self.pending.pop_front() {
            let rest = self.send(buf)?;
            if !rest.is_empty() {
                self.pending.push_front(rest);
                return Ok(());
            }
        }

        self.transition(ConnState::ReadOnly, mux)
    }

    /// Deregister from the multiplexer and drop queued output.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&mut self, mux: &Multiplexer) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        if let Err(e) = mux.unregister(&mut self.stream) {
            debug!(conn_id = self.token.0, error = %e, "Deregister failed");
        }
        let discarded: usize = self.pending.iter().map(Bytes::len).sum();
        self.pending.clear();
        self.state = ConnState::Closed;

        let duration_ms = (Utc::now() - self.connected_at).num_milliseconds();
        debug!(
            conn_id = self.token.0,
            peer = %self.peer,
            nick = %self.nickname,
            duration_ms,
            discarded,
            "Connection closed"
        );
        true
    }

    /// Send until `buf` is exhausted or the socket would block.
    /// Returns the unsent remainder (empty when everything went out).
    fn send(&mut self, mut buf: Bytes) -> io::Result<Bytes> {
        while !buf.is_empty() {
            match self.stream.write(&buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(buf)
    }

    fn transition(&mut self, state: ConnState, mux: &Multiplexer) -> io::Result<()> {
        if self.state == state {
            return Ok(());
        }
        if let Some(interest) = state.interest() {
            mux.modify(&mut self.stream, self.token, interest)?;
        }
        self.state = state;
        Ok(())
    }
}

impl<S> Connection<S> {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn set_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_string();
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of buffers waiting for write readiness.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn stream(&self) -> &S {
        &self.stream
    }

    #[cfg(test)]
    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;
    use crate::config::FramingMode;

    fn open(stream: MockStream, mux: &Multiplexer) -> Connection<MockStream> {
        Connection::open(
            stream,
            Token(3),
            "127.0.0.1:5555".parse().unwrap(),
            "000001".to_string(),
            FrameDecoder::new(FramingMode::Line, 1024),
            mux,
        )
        .unwrap()
    }

    #[test]
    fn test_open_registers_read_only() {
        let mux = Multiplexer::new(8).unwrap();
        let conn = open(MockStream::default(), &mux);

        assert_eq!(conn.state(), ConnState::ReadOnly);
        assert_eq!(conn.stream().interest, Some(Interest::READABLE));
        assert_eq!(conn.nickname(), "000001");
    }

    #[test]
    fn test_write_completes_immediately() {
        let mux = Multiplexer::new(8).unwrap();
        let mut conn = open(MockStream::default(), &mux);

        conn.write(Bytes::from_static(b"hi\n"), &mux).unwrap();
        assert_eq!(conn.stream().written, b"hi\n");
        assert_eq!(conn.state(), ConnState::ReadOnly);
        assert_eq!(conn.pending_len(), 0);
    }

    #[test]
    fn test_partial_write_escalates_and_drains_in_order() {
        let mux = Multiplexer::new(8).unwrap();
        let mut conn = open(MockStream::with_budget(3), &mux);

        conn.write(Bytes::from_static(b"abcdef"), &mux).unwrap();
        assert_eq!(conn.state(), ConnState::ReadWrite);
        assert_eq!(
            conn.stream().interest,
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        assert_eq!(conn.stream_mut().take_written(), b"abc");

        // Queued behind the backlog, not attempted
        conn.stream_mut().budget = Some(100);
        conn.write(Bytes::from_static(b"ghi"), &mux).unwrap();
        assert!(conn.stream().written.is_empty());
        assert_eq!(conn.pending_len(), 2);

        conn.flush(&mux).unwrap();
        assert_eq!(conn.stream().written, b"defghi");
        assert_eq!(conn.state(), ConnState::ReadOnly);
        assert_eq!(conn.stream().interest, Some(Interest::READABLE));
    }

    #[test]
    fn test_flush_stops_on_partial_head() {
        let mux = Multiplexer::new(8).unwrap();
        let mut conn = open(MockStream::with_budget(0), &mux);

        conn.write(Bytes::from_static(b"first"), &mux).unwrap();
        conn.write(Bytes::from_static(b"second"), &mux).unwrap();
        assert_eq!(conn.pending_len(), 2);

        conn.stream_mut().budget = Some(2);
        conn.flush(&mux).unwrap();
        assert_eq!(conn.stream_mut().take_written(), b"fi");
        assert_eq!(conn.pending_len(), 2);
        assert_eq!(conn.state(), ConnState::ReadWrite);

        conn.stream_mut().budget = Some(5);
        conn.flush(&mux).unwrap();
        assert_eq!(conn.stream_mut().take_written(), b"rstse");
        assert_eq!(conn.pending_len(), 1);

        conn.stream_mut().budget = None;
        conn.flush(&mux).unwrap();
        assert_eq!(conn.stream().written, b"cond");
        assert_eq!(conn.state(), ConnState::ReadOnly);
    }

    #[test]
    fn test_write_error_propagates() {
        let mux = Multiplexer::new(8).unwrap();
        let mut conn = open(MockStream::default(), &mux);
        conn.stream_mut().broken = true;

        let err = conn.write(Bytes::from_static(b"x"), &mux).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_read_returns_after_each_chunk() {
        let mux = Multiplexer::new(8).unwrap();
        let mut stream = MockStream::default();
        stream.inbound.push_back(b"hello\nwor".to_vec());
        stream.inbound.push_back(b"ld\n".to_vec());
        let mut conn = open(stream, &mux);

        let mut scratch = [0u8; 64];
        let mut frames = Vec::new();

        assert!(matches!(
            conn.read(&mut scratch, &mut frames),
            ReadOutcome::Received
        ));
        assert_eq!(frames, vec![Bytes::from_static(b"hello\n")]);
        assert_eq!(conn.stream().inbound.len(), 1);

        frames.clear();
        assert!(matches!(
            conn.read(&mut scratch, &mut frames),
            ReadOutcome::Received
        ));
        assert_eq!(frames, vec![Bytes::from_static(b"world\n")]);

        frames.clear();
        assert!(matches!(
            conn.read(&mut scratch, &mut frames),
            ReadOutcome::Drained
        ));
        assert!(frames.is_empty());
    }

    #[test]
    fn test_read_eof_flushes_partial_frame() {
        let mux = Multiplexer::new(8).unwrap();
        let mut stream = MockStream::default();
        stream.inbound.push_back(b"bye".to_vec());
        stream.eof = true;
        let mut conn = open(stream, &mux);

        let mut scratch = [0u8; 2];
        let mut frames = Vec::new();
        let mut outcome = conn.read(&mut scratch, &mut frames);
        while matches!(outcome, ReadOutcome::Received) {
            outcome = conn.read(&mut scratch, &mut frames);
        }
        assert!(matches!(outcome, ReadOutcome::PeerClosed));
        assert_eq!(frames, vec![Bytes::from_static(b"bye")]);
    }

    #[test]
    fn test_read_overlong_line_fails() {
        let mux = Multiplexer::new(8).unwrap();
        let mut stream = MockStream::default();
        stream.inbound.push_back(b"ok\n".to_vec());
        stream.inbound.push_back(vec![b'a'; 2048]);
        let mut conn = open(stream, &mux);

        let mut scratch = [0u8; 4096];
        let mut frames = Vec::new();
        assert!(matches!(
            conn.read(&mut scratch, &mut frames),
            ReadOutcome::Received
        ));
        assert_eq!(frames, vec![Bytes::from_static(b"ok\n")]);

        match conn.read(&mut scratch, &mut frames) {
            ReadOutcome::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let mux = Multiplexer::new(8).unwrap();
        let mut conn = open(MockStream::with_budget(0), &mux);
        conn.write(Bytes::from_static(b"stuck"), &mux).unwrap();

        assert!(conn.close(&mux));
        assert_eq!(conn.state(), ConnState::Closed);
        assert_eq!(conn.stream().interest, None);
        assert_eq!(conn.pending_len(), 0);

        assert!(!conn.close(&mux));
        let err = conn.write(Bytes::from_static(b"x"), &mux).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_nickname_allocator_is_unique() {
        let mut nicknames = NicknameAllocator::default();
        assert_eq!(nicknames.allocate(), "000001");
        assert_eq!(nicknames.allocate(), "000002");
        assert_eq!(nicknames.allocate().len(), 6);
    }
}
