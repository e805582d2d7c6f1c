use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{FrameConfig, FramingStrategy};
use crate::error::{FrameError, Result};
use crate::wire::{IdentityCodec, WireCodec};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// `send` marshals a payload with the outbound framing strategy and escapes
/// it with the wire codec; `write_bytes` skips marshalling and `write_raw`
/// skips both.
pub struct FrameWriter<T> {
    inner: T,
    marshalled: BytesMut,
    buf: BytesMut,
    strategy: Box<dyn FramingStrategy>,
    codec: Box<dyn WireCodec>,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a frame writer with the identity codec and default configuration.
    pub fn new(inner: T, strategy: Box<dyn FramingStrategy>) -> Self {
        Self::with_config(inner, strategy, Box::new(IdentityCodec), FrameConfig::default())
    }

    /// Create a frame writer with explicit codec and configuration.
    pub fn with_config(
        inner: T,
        strategy: Box<dyn FramingStrategy>,
        codec: Box<dyn WireCodec>,
        config: FrameConfig,
    ) -> Self {
        Self {
            inner,
            marshalled: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            strategy,
            codec,
            config,
        }
    }

    /// Marshal, escape and send one payload.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.marshalled.clear();
        self.strategy.encode(payload, &mut self.marshalled)?;

        self.buf.clear();
        self.codec.encode(&self.marshalled, &mut self.buf);
        debug!(payload = payload.len(), wire = self.buf.len(), "sending frame");
        self.write_buffered()
    }

    /// Escape and send bytes that are already marshalled.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.codec.encode(bytes, &mut self.buf);
        self.write_buffered()
    }

    /// Send bytes exactly as given.
    ///
    /// Used for transport control sequences that must not be escaped.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.write_buffered()
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => match self.config.write_timeout {
                    Some(timeout) => return Err(FrameError::Timeout(timeout)),
                    None => continue,
                },
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => match self.config.write_timeout {
                    Some(timeout) => return Err(FrameError::Timeout(timeout)),
                    None => continue,
                },
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
