use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use devwire_frame::Frame;
use devwire_transport::{CloseHandle, ShutdownHandle, TransportError};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::listener::SessionListener;
use crate::session::Session;

/// Pause before accepting again after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

type Handler = dyn Fn(Frame) -> Option<Bytes> + Send + Sync;

/// Request/response server built on a [`SessionListener`].
///
/// Each accepted connection gets its own worker thread. The worker reads a
/// request frame, passes its payload to the handler and marshals the
/// handler's response (if any) with the outbound framing, until the client
/// disconnects.
pub struct Server {
    listener: SessionListener,
    handler: Arc<Handler>,
}

impl Server {
    pub fn new<H>(listener: SessionListener, handler: H) -> Self
    where
        H: Fn(Frame) -> Option<Bytes> + Send + Sync + 'static,
    {
        Self {
            listener,
            handler: Arc::new(handler),
        }
    }

    /// Address the server accepts on.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Start the accept loop on a background thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.listener.local_addr();
        let shutdown = self.listener.shutdown_handle();
        let accept_thread = thread::Builder::new()
            .name(format!("devwire-accept-{}", local_addr.port()))
            .spawn(move || self.run())
            .map_err(TransportError::Io)?;

        info!(addr = %local_addr, "server started");
        Ok(ServerHandle {
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Run the accept loop on the current thread until shut down.
    pub fn run(self) {
        let mut workers: Vec<(CloseHandle, JoinHandle<()>)> = Vec::new();

        loop {
            workers.retain(|(_, worker)| !worker.is_finished());

            let session = match self.listener.accept() {
                Ok(session) => session,
                Err(SessionError::Connection(TransportError::Shutdown)) => break,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };

            let close = session.close_handle();
            let handler = Arc::clone(&self.handler);
            let name = format!("devwire-{}", session.id());
            match thread::Builder::new()
                .name(name)
                .spawn(move || serve(session, handler.as_ref()))
            {
                Ok(worker) => workers.push((close, worker)),
                Err(err) => warn!(error = %err, "failed to spawn session worker"),
            }
        }

        for (close, _) in &workers {
            if let Err(err) = close.close() {
                debug!(error = %err, "session shutdown failed");
            }
        }
        for (_, worker) in workers {
            let _ = worker.join();
        }
        info!(addr = %self.listener.local_addr(), "server stopped");
    }
}

fn serve(mut session: Session, handler: &Handler) {
    debug!(session = %session.id(), peer = ?session.peer_addr(), "serving");
    let timeout = session.config().read_timeout;

    loop {
        let request = match session.receive(timeout) {
            Ok(frame) => frame,
            Err(SessionError::Timeout(_)) => continue,
            Err(SessionError::Closed) => {
                debug!(session = %session.id(), "client disconnected");
                break;
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "receive failed");
                break;
            }
        };

        let Some(response) = handler(request) else {
            continue;
        };
        if let Err(err) = session.send_frame(&response) {
            warn!(session = %session.id(), error = %err, "failed to send response");
            if !err.is_recoverable() {
                break;
            }
        }
    }
}

/// Controls a spawned [`Server`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server accepts on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close live sessions and wait for all threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.accept_thread.take() {
            if thread.join().is_err() {
                warn!("accept thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
