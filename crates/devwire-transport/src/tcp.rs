use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{closed_error, ByteStream, CloseHandle};

/// How often a pending accept re-checks its shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A connected TCP byte stream.
pub struct TcpByteStream {
    stream: TcpStream,
    handle: CloseHandle,
}

impl TcpByteStream {
    /// Wrap a connected std TCP stream.
    pub fn from_std(stream: TcpStream) -> Result<Self> {
        let closer = stream.try_clone()?;
        let handle = CloseHandle::with_shutdown(move || match closer.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone; nothing left to shut down.
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        });
        Ok(Self { stream, handle })
    }

    /// Local address of this end of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }
}

impl Read for TcpByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.handle.is_closed() {
            return Err(closed_error());
        }
        self.stream.read(buf)
    }
}

impl Write for TcpByteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.handle.is_closed() {
            return Err(closed_error());
        }
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.handle.is_closed() {
            return Err(closed_error());
        }
        self.stream.flush()
    }
}

impl ByteStream for TcpByteStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            handle: self.handle.clone(),
        })
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn close_handle(&self) -> CloseHandle {
        self.handle.clone()
    }
}

impl fmt::Debug for TcpByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpByteStream")
            .field("peer", &self.stream.peer_addr().ok())
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

/// Connect to `addr`, trying every resolved socket address in turn.
///
/// With `timeout` set, each attempt is bounded by it; refusal, timeout and
/// unreachable hosts all surface as [`TransportError::Connect`].
pub fn connect<A>(addr: A, timeout: Option<Duration>) -> Result<TcpByteStream>
where
    A: ToSocketAddrs + fmt::Display,
{
    let described = addr.to_string();
    let candidates = addr
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            addr: described.clone(),
            source,
        })?;

    let mut last_err = None;
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => {
                debug!(addr = %described, peer = %candidate, "connected");
                return TcpByteStream::from_std(stream);
            }
            Err(err) => {
                debug!(addr = %described, peer = %candidate, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(source) => Err(TransportError::Connect {
            addr: described,
            source,
        }),
        None => Err(TransportError::Resolve { addr: described }),
    }
}

/// Listens for TCP connections.
///
/// Accepting blocks until a peer connects or the acceptor is shut down via
/// its [`ShutdownHandle`].
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
}

impl TcpAcceptor {
    /// Bind and listen on `addr`. Port 0 picks a free port.
    pub fn bind<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let described = addr.to_string();
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: described.clone(),
            source,
        })?;
        // Non-blocking so a pending accept can observe shutdown.
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                addr: described.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<TcpByteStream> {
        loop {
            if self.shutdown.is_shutdown() {
                return Err(TransportError::Shutdown);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Some platforms hand out sockets inheriting the listener's mode.
                    stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                    debug!(%peer, "accepted connection");
                    return TcpByteStream::from_std(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// The address this acceptor is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops pending and future accepts.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl fmt::Debug for TcpAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpAcceptor")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.shutdown.is_shutdown())
            .finish()
    }
}

/// Cancels a [`TcpAcceptor`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Stop accepting. Pending accepts return [`TransportError::Shutdown`].
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn loopback_pair() -> (TcpByteStream, TcpByteStream) {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr();
        let handle = std::thread::spawn(move || connect(addr, Some(Duration::from_secs(2))).unwrap());
        let server = acceptor.accept().unwrap();
        let client = handle.join().unwrap();
        (client, server)
    }

    #[test]
    fn test_bind_accept_connect() {
        let (mut client, mut server) = loopback_pair();

        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert_eq!(server.peer_addr(), client.local_addr().ok());
    }

    #[test]
    fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening there.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = connect(format!("127.0.0.1:{port}"), Some(Duration::from_millis(500)));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_connect_unresolvable_address() {
        let result = connect("not a socket address", None);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_closed_stream_rejects_io() {
        let (mut client, _server) = loopback_pair();

        client.close().unwrap();
        client.close().unwrap();

        assert!(client.is_closed());
        let err = client.write(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn test_clone_shares_closed_state() {
        let (client, _server) = loopback_pair();
        let mut clone = client.try_clone().unwrap();

        client.close_handle().close().unwrap();
        assert!(clone.is_closed());
        assert!(clone.write(b"x").is_err());
    }

    #[test]
    fn test_close_handle_unblocks_reader() {
        let (client, _server) = loopback_pair();
        let mut reader = client.try_clone().unwrap();
        let handle = client.close_handle();

        let blocked = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            reader.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        handle.close().unwrap();

        // Either EOF from the shutdown or a closed-stream error is fine.
        let outcome = blocked.join().unwrap();
        assert!(matches!(outcome, Ok(0) | Err(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_read_timeout_reports_would_block() {
        let (mut client, _server) = loopback_pair();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = client.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::WouldBlock | ErrorKind::TimedOut
        ));
    }

    #[test]
    fn test_shutdown_cancels_accept() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let shutdown = acceptor.shutdown_handle();

        let pending = std::thread::spawn(move || acceptor.accept());
        std::thread::sleep(Duration::from_millis(50));
        shutdown.shutdown();

        let result = pending.join().unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown)));
    }

    #[test]
    fn test_bind_rejects_address_in_use() {
        let first = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let result = TcpAcceptor::bind(first.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }
}
