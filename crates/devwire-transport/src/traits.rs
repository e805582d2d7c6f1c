use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

type ShutdownFn = dyn Fn() -> std::io::Result<()> + Send + Sync;

/// A connected, ordered byte channel with blocking reads and writes.
///
/// This is the collaborator every session is built on. Reads honour the
/// timeout installed with [`ByteStream::set_read_timeout`] and report an
/// elapsed timeout as `WouldBlock` or `TimedOut`, exactly like std sockets.
/// Once closed, reads and writes fail with `NotConnected`.
pub trait ByteStream: Read + Write + Send + Sized {
    /// Set read timeout on the underlying stream (`None` blocks forever).
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Set write timeout on the underlying stream.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Try to clone this stream. Clones share the same closed state.
    fn try_clone(&self) -> Result<Self>;

    /// Address of the connected peer, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// A handle that can close this stream from any thread.
    fn close_handle(&self) -> CloseHandle;

    /// Close the stream. Idempotent.
    fn close(&mut self) -> Result<()> {
        self.close_handle().close()
    }

    /// Whether the stream has been closed.
    fn is_closed(&self) -> bool {
        self.close_handle().is_closed()
    }
}

/// Closes a [`ByteStream`] from another thread.
///
/// Closing marks the stream (and every clone of it) closed and shuts the
/// underlying transport down, so a read blocked on another thread returns
/// promptly instead of waiting for its timeout.
#[derive(Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
    shutdown: Option<Arc<ShutdownFn>>,
}

impl CloseHandle {
    /// A handle that only tracks the closed flag.
    pub fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: None,
        }
    }

    /// A handle that also runs `shutdown` the first time it is closed.
    pub fn with_shutdown<F>(shutdown: F) -> Self
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Some(Arc::new(shutdown)),
        }
    }

    /// Close the stream. Only the first call does any work.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(shutdown) = &self.shutdown {
            shutdown()?;
        }
        Ok(())
    }

    /// Whether [`CloseHandle::close`] has been called on this handle or a clone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The error returned by reads and writes on a closed stream.
pub fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "stream closed")
}
