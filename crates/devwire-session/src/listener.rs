use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};

use devwire_transport::{ByteStream, ShutdownHandle, TcpAcceptor};
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::{Role, Session};

/// Listens for and accepts device client connections.
///
/// The listener holds no per-connection state; every accepted connection
/// becomes an independent server [`Session`].
pub struct SessionListener {
    acceptor: TcpAcceptor,
    config: SessionConfig,
    next_session_id: AtomicU64,
}

impl SessionListener {
    /// Bind to a TCP address. Port 0 picks a free port.
    pub fn bind<A>(addr: A, config: SessionConfig) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let acceptor = TcpAcceptor::bind(addr)?;
        Ok(Self {
            acceptor,
            config,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Override the configuration given to accepted sessions.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection and assign an auto-generated session id.
    ///
    /// Blocks until a client connects or the listener is shut down.
    pub fn accept(&self) -> Result<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.accept_with_id(&format!("session-{id}"))
    }

    /// Accept the next connection and use an explicit session id.
    pub fn accept_with_id(&self, session_id: &str) -> Result<Session> {
        let stream = self.acceptor.accept()?;
        debug!(session = session_id, peer = ?stream.peer_addr(), "accepted");
        Session::from_stream(session_id, Role::Server, stream, self.config.clone())
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// A handle that cancels pending and future accepts.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.acceptor.shutdown_handle()
    }

    /// Configuration handed to accepted sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl fmt::Debug for SessionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionListener")
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
