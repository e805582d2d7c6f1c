use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use devwire_frame::{
    refusal, Deadline, Frame, FrameError, FrameReader, FrameWriter, IdentityCodec, TelnetCodec,
    TelnetEvent, WireCodec,
};
use devwire_transport::{ByteStream, CloseHandle, TcpByteStream};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

/// Upper bound on Telnet events kept for [`Session::take_telnet_events`].
pub(crate) const MAX_RETAINED_EVENTS: usize = 256;

/// Which end of the connection a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened by [`crate::connect`].
    Client,
    /// Produced by [`crate::SessionListener::accept`].
    Server,
}

/// One framed connection to a peer.
///
/// Every I/O method takes `&mut self`: a session serves one request at a
/// time. Use [`Session::close_handle`] to interrupt a blocked call from
/// another thread.
pub struct Session<S: ByteStream = TcpByteStream> {
    id: String,
    role: Role,
    peer_addr: Option<SocketAddr>,
    reader: FrameReader<S>,
    writer: FrameWriter<S>,
    handle: CloseHandle,
    config: SessionConfig,
    events: Vec<TelnetEvent>,
    closed: bool,
}

impl<S: ByteStream> Session<S> {
    /// Wrap a connected stream.
    pub fn from_stream(
        id: impl Into<String>,
        role: Role,
        stream: S,
        config: SessionConfig,
    ) -> Result<Self> {
        stream.set_write_timeout(config.write_timeout)?;
        let reader_stream = stream.try_clone()?;
        let handle = stream.close_handle();
        let peer_addr = stream.peer_addr();

        let (inbound_codec, outbound_codec) = wire_codecs(&config);
        let frame_config = config.frame_config();
        let reader = FrameReader::with_config(
            reader_stream,
            config.framing.build()?,
            inbound_codec,
            frame_config.clone(),
        );
        let writer = FrameWriter::with_config(
            stream,
            config.outbound().build()?,
            outbound_codec,
            frame_config,
        );

        Ok(Self {
            id: id.into(),
            role,
            peer_addr,
            reader,
            writer,
            handle,
            config,
            events: Vec::new(),
            closed: false,
        })
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client or server end.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Remote address, when the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed || self.handle.is_closed()
    }

    /// A handle that closes this session from another thread.
    ///
    /// A call blocked in [`Session::receive`] returns
    /// [`SessionError::Closed`] promptly once the handle is closed.
    pub fn close_handle(&self) -> CloseHandle {
        self.handle.clone()
    }

    /// Decoded bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> &[u8] {
        self.reader.buffered()
    }

    /// Drain the Telnet control events seen so far.
    pub fn take_telnet_events(&mut self) -> Vec<TelnetEvent> {
        std::mem::take(&mut self.events)
    }

    /// Write `request` as-is (after wire escaping), then return one frame.
    ///
    /// `timeout` bounds the whole frame assembly. On timeout the partial
    /// frame stays buffered and the session remains usable.
    pub fn send_receive(&mut self, request: &[u8], timeout: Option<Duration>) -> Result<Frame> {
        self.send(request)?;
        self.receive(timeout)
    }

    /// Marshal `payload`, send it and return the reply frame.
    ///
    /// Uses the configured `read_timeout`.
    pub fn request(&mut self, payload: &[u8]) -> Result<Frame> {
        self.send_frame(payload)?;
        self.receive(self.config.read_timeout)
    }

    /// Marshal and send `payload` without waiting for a reply.
    pub fn notify(&mut self, payload: &[u8]) -> Result<()> {
        debug!(session = %self.id, len = payload.len(), "notify");
        self.send_frame(payload)
    }

    /// Marshal `payload` with the outbound framing and send it.
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let sent = self.writer.send(payload);
        sent.map_err(|err| self.fail(err))
    }

    /// Send already-marshalled bytes.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let sent = self.writer.write_bytes(bytes);
        sent.map_err(|err| self.fail(err))
    }

    /// Return the next complete frame, waiting at most `timeout`.
    ///
    /// A frame already buffered from an earlier over-read is returned
    /// without touching the stream.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        self.ensure_open()?;
        let deadline = Deadline::after(timeout);
        loop {
            match self.reader.try_decode() {
                Ok(Some(frame)) => {
                    debug!(session = %self.id, len = frame.len(), "frame received");
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(err) => return Err(self.fail(err)),
            }

            if let Err(err) = self.reader.fill_before(&deadline) {
                return Err(self.fail(err));
            }
            self.handle_telnet_events()?;
        }
    }

    /// Close the session. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.handle.close() {
            debug!(session = %self.id, error = %err, "socket shutdown failed");
        }
        self.reader.reset();
        debug!(session = %self.id, "session closed");
    }

    pub(crate) fn discard_banner(&mut self, timeout: Duration) -> Result<()> {
        match self.reader.fill_before(&Deadline::after(Some(timeout))) {
            Ok(read) => {
                self.handle_telnet_events()?;
                debug!(session = %self.id, read, "discarded banner");
                self.reader.discard_buffered();
                Ok(())
            }
            Err(FrameError::Timeout(_)) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn handle_telnet_events(&mut self) -> Result<()> {
        let events = self.reader.take_events();
        if events.is_empty() {
            return Ok(());
        }

        let refuse = self
            .config
            .telnet
            .as_ref()
            .is_some_and(|telnet| telnet.refuse_options);
        for event in &events {
            debug!(session = %self.id, ?event, "telnet event");
            if !refuse {
                continue;
            }
            if let Some(reply) = refusal(event) {
                let written = self.writer.write_raw(&reply);
                written.map_err(|err| self.fail(err))?;
            }
        }

        self.events.extend(events);
        if self.events.len() > MAX_RETAINED_EVENTS {
            let excess = self.events.len() - MAX_RETAINED_EVENTS;
            self.events.drain(..excess);
        }
        Ok(())
    }

    /// Translate a frame error, closing the session when it is unrecoverable.
    fn fail(&mut self, err: FrameError) -> SessionError {
        if self.handle.is_closed() {
            self.close();
            return SessionError::Closed;
        }
        let err = SessionError::from(err);
        if !err.is_recoverable() {
            match &err {
                SessionError::FrameTooLarge { size, max } => {
                    warn!(session = %self.id, size, max, "frame too large; closing session");
                }
                other => debug!(session = %self.id, error = %other, "closing session"),
            }
            self.close();
        }
        err
    }
}

fn wire_codecs(config: &SessionConfig) -> (Box<dyn WireCodec>, Box<dyn WireCodec>) {
    if config.telnet.is_some() {
        (Box::new(TelnetCodec::new()), Box::new(TelnetCodec::new()))
    } else {
        (Box::new(IdentityCodec), Box::new(IdentityCodec))
    }
}

impl<S: ByteStream> Drop for Session<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: ByteStream> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
