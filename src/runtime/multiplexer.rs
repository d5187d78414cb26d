//! Readiness multiplexer.
//!
//! Thin owner of a mio `Poll` (epoll on Linux, kqueue on macOS). Sources are
//! registered under a `Token`; `poll` blocks until at least one of them is
//! ready and copies the batch into a caller-owned buffer as plain values, so
//! the caller can mutate connection state while walking it.

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io;

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    /// Data, EOF, or a pending socket error can be observed by reading.
    pub readable: bool,
    pub writable: bool,
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    /// Create a multiplexer collecting at most `capacity` events per poll.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry().register(source, token, interest)
    }

    /// Replace the interest set of an already registered source.
    pub fn modify<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry().reregister(source, token, interest)
    }

    pub fn unregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry().deregister(source)
    }

    /// Create a waker that makes `poll` return with `token`.
    pub fn waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.registry(), token)
    }

    /// Block until at least one registered source is ready and refill
    /// `ready` with the batch. The buffer is reused across calls.
    ///
    /// No timeout: the loop is purely event driven. Signal interruptions
    /// are retried.
    pub fn poll(&mut self, ready: &mut Vec<Readiness>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        ready.clear();
        ready.extend(self.events.iter().map(|event| Readiness {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable(),
        }));
        Ok(())
    }

    fn registry(&self) -> &Registry {
        self.poll.registry()
    }
}
