//! Tokio variant of [`crate::Session`] (feature `async`).

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use devwire_frame::{
    refusal, Frame, FrameCodec, FrameError, IdentityCodec, Outbound, TelnetCodec, TelnetEvent,
    WireCodec,
};
use devwire_transport::TransportError;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::session::MAX_RETAINED_EVENTS;

/// An asynchronous framed connection.
///
/// Frame assembly state lives in the `Framed` read buffer, so a timed-out
/// [`AsyncSession::receive`] loses nothing. Telnet refusals are written
/// after each decoded frame.
pub struct AsyncSession {
    id: String,
    peer_addr: Option<SocketAddr>,
    framed: Framed<TcpStream, FrameCodec>,
    config: SessionConfig,
    events: Vec<TelnetEvent>,
    closed: bool,
}

impl AsyncSession {
    /// Connect with explicit configuration.
    pub async fn connect<A>(addr: A, config: SessionConfig) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let described = addr.to_string();
        let attempt = TcpStream::connect(addr);
        let connected = match config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::from(ErrorKind::TimedOut)),
            },
            None => attempt.await,
        };
        let stream = connected.map_err(|source| TransportError::Connect {
            addr: described.clone(),
            source,
        })?;
        info!(addr = %described, "connected");

        let mut session = Self::from_stream(format!("async-{described}"), stream, config)?;
        let banner_timeout = session
            .config
            .telnet
            .as_ref()
            .and_then(|telnet| telnet.banner_timeout);
        if let Some(timeout) = banner_timeout {
            session.discard_banner(timeout).await?;
        }
        Ok(session)
    }

    /// Wrap a connected tokio stream.
    pub fn from_stream(
        id: impl Into<String>,
        stream: TcpStream,
        config: SessionConfig,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr().ok();
        let wire: Box<dyn WireCodec> = if config.telnet.is_some() {
            Box::new(TelnetCodec::new())
        } else {
            Box::new(IdentityCodec)
        };
        let codec = FrameCodec::with_parts(
            config.framing.build()?,
            config.outbound().build()?,
            wire,
            config.max_frame_size,
        )?;

        Ok(Self {
            id: id.into(),
            peer_addr,
            framed: Framed::new(stream, codec),
            config,
            events: Vec::new(),
            closed: false,
        })
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain the Telnet control events seen so far.
    pub fn take_telnet_events(&mut self) -> Vec<TelnetEvent> {
        std::mem::take(&mut self.events)
    }

    /// Write `request` unmarshalled, then return one frame within `timeout`.
    pub async fn send_receive(
        &mut self,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        self.send(request).await?;
        self.receive(timeout).await
    }

    /// Marshal `payload`, send it and return the reply frame.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Frame> {
        self.send_frame(payload).await?;
        self.receive(self.config.read_timeout).await
    }

    /// Marshal `payload` with the outbound framing and send it.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.write(Outbound::Payload(Bytes::copy_from_slice(payload)))
            .await
    }

    /// Send already-marshalled bytes.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(Outbound::Marshalled(Bytes::copy_from_slice(bytes)))
            .await
    }

    /// Return the next complete frame, waiting at most `timeout`.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        self.ensure_open()?;
        let next = match timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.framed.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.handle_telnet_events().await?;
                        return Err(SessionError::Timeout(timeout));
                    }
                }
            }
            None => self.framed.next().await,
        };

        match next {
            Some(Ok(frame)) => {
                self.handle_telnet_events().await?;
                debug!(session = %self.id, len = frame.len(), "frame received");
                Ok(frame)
            }
            Some(Err(err)) => Err(self.fail(err).await),
            None => {
                self.close().await;
                Err(SessionError::Closed)
            }
        }
    }

    /// Close the session. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.framed.get_mut().shutdown().await {
            debug!(session = %self.id, error = %err, "socket shutdown failed");
        }
        debug!(session = %self.id, "session closed");
    }

    async fn discard_banner(&mut self, timeout: Duration) -> Result<()> {
        let mut discarded = 0usize;
        // An unrepresentable deadline never expires.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            let next = match tokio::time::timeout(remaining, self.framed.next()).await {
                Ok(next) => next,
                Err(_) => break,
            };
            match next {
                Some(Ok(_)) => discarded += 1,
                Some(Err(err)) => return Err(self.fail(err).await),
                None => {
                    self.close().await;
                    return Err(SessionError::Closed);
                }
            }
        }
        // An unterminated greeting such as a login prompt is dropped too.
        self.framed.codec_mut().discard_buffered();
        self.handle_telnet_events().await?;
        debug!(session = %self.id, discarded, "discarded banner");
        Ok(())
    }

    async fn write(&mut self, item: Outbound) -> Result<()> {
        self.ensure_open()?;
        let sent = match self.config.write_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.framed.send(item)).await {
                Ok(result) => result,
                Err(_) => Err(FrameError::Timeout(timeout)),
            },
            None => self.framed.send(item).await,
        };
        match sent {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn handle_telnet_events(&mut self) -> Result<()> {
        let events = self.framed.codec_mut().take_events();
        if events.is_empty() {
            return Ok(());
        }

        let refuse = self
            .config
            .telnet
            .as_ref()
            .is_some_and(|telnet| telnet.refuse_options);
        if refuse {
            for event in &events {
                if let Some(reply) = refusal(event) {
                    let sent = self
                        .framed
                        .send(Outbound::Raw(Bytes::copy_from_slice(&reply)))
                        .await;
                    if let Err(err) = sent {
                        return Err(self.fail(err).await);
                    }
                }
            }
        }
        self.events.extend(events);
        if self.events.len() > MAX_RETAINED_EVENTS {
            let excess = self.events.len() - MAX_RETAINED_EVENTS;
            self.events.drain(..excess);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    async fn fail(&mut self, err: FrameError) -> SessionError {
        let err = SessionError::from(err);
        if !err.is_recoverable() {
            if let SessionError::FrameTooLarge { size, max } = &err {
                warn!(session = %self.id, size, max, "frame too large; closing session");
            }
            self.close().await;
        }
        err
    }
}

impl fmt::Debug for AsyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.closed)
            .finish()
    }
}
