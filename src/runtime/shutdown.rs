//! Shutdown signalling.
//!
//! The event loop blocks in `poll` with no timeout, so a shutdown request
//! has to wake it: a `ShutdownHandle` sets a flag and fires a mio `Waker`
//! registered with the loop's multiplexer. OS signals are awaited on a
//! separate thread running a single-threaded tokio runtime; that thread
//! never touches connection state.

use mio::Waker;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn new(waker: Waker) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        }
    }

    /// Ask the event loop to close every connection and return.
    pub fn trigger(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Wait for `signal` to resolve, then trigger shutdown.
pub async fn trigger_on<F>(signal: F, handle: &ShutdownHandle) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    signal.await?;
    handle.trigger()
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
async fn interrupt_or_terminate() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Interrupt received");
        }
        _ = terminate.recv() => info!("Terminate received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn interrupt_or_terminate() -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    Ok(())
}

/// Spawn the thread that turns OS signals into a shutdown request.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> io::Result<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(trigger_on(interrupt_or_terminate(), &handle)) {
                error!(error = %e, "Signal listener failed");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::multiplexer::Multiplexer;
    use mio::Token;

    #[test]
    fn test_trigger_sets_flag_and_wakes() {
        let mut mux = Multiplexer::new(4).unwrap();
        let handle = ShutdownHandle::new(mux.waker(Token(9)).unwrap());
        assert!(!handle.is_requested());

        handle.clone().trigger().unwrap();
        assert!(handle.is_requested());
        let mut ready = Vec::new();
        mux.poll(&mut ready).unwrap();
        assert_eq!(ready[0].token, Token(9));
    }

    #[test]
    fn test_trigger_on_signal_future() {
        let mux = Multiplexer::new(4).unwrap();
        let handle = ShutdownHandle::new(mux.waker(Token(9)).unwrap());

        tokio_test::block_on(trigger_on(async { Ok(()) }, &handle)).unwrap();
        assert!(handle.is_requested());
    }

    #[test]
    fn test_failed_signal_does_not_trigger() {
        let mux = Multiplexer::new(4).unwrap();
        let handle = ShutdownHandle::new(mux.waker(Token(9)).unwrap());

        let res = tokio_test::block_on(trigger_on(
            async { Err(io::Error::new(io::ErrorKind::Other, "no signals")) },
            &handle,
        ));
        assert!(res.is_err());
        assert!(!handle.is_requested());
    }
}
