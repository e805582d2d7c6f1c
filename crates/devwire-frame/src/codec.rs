use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default maximum wire size of one frame: 1 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default number of bytes requested from the stream per read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// One complete application message extracted from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload, without any terminator.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.payload.as_ref()
    }
}

/// Where the next frame ends inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    /// Payload bytes at the head of the buffer.
    pub frame_len: usize,
    /// Bytes to drop from the head of the buffer, delimiter included.
    pub consumed: usize,
}

/// Decides where one message ends in an accumulating buffer.
///
/// Strategies are pure buffer inspection: they never block and never touch
/// the stream. Between two calls that return `None` the buffer may only
/// have grown at its tail; a strategy may rely on that to resume scanning.
/// Any state a strategy keeps is dropped once it reports a frame.
pub trait FramingStrategy: Send {
    /// Locate a complete frame at the head of `buf`.
    fn extract(&mut self, buf: &[u8]) -> Option<Extracted>;

    /// Marshal an application payload into its wire form.
    fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()>;

    /// Forget any scan state.
    fn reset(&mut self) {}
}

impl<S: FramingStrategy + ?Sized> FramingStrategy for Box<S> {
    fn extract(&mut self, buf: &[u8]) -> Option<Extracted> {
        (**self).extract(buf)
    }

    fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        (**self).encode(payload, dst)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Frames terminated by a fixed byte sequence, e.g. `\n` or `\r\n`.
#[derive(Debug, Clone)]
pub struct SentinelFraming {
    terminator: Bytes,
    /// Buffer length already searched without finding the terminator.
    scanned: usize,
}

impl SentinelFraming {
    /// Create a sentinel strategy. The terminator must not be empty.
    pub fn new(terminator: impl Into<Bytes>) -> Result<Self> {
        let terminator = terminator.into();
        if terminator.is_empty() {
            return Err(FrameError::InvalidConfig("terminator must not be empty"));
        }
        Ok(Self {
            terminator,
            scanned: 0,
        })
    }

    /// The configured terminator.
    pub fn terminator(&self) -> &[u8] {
        self.terminator.as_ref()
    }
}

impl FramingStrategy for SentinelFraming {
    fn extract(&mut self, buf: &[u8]) -> Option<Extracted> {
        let term = self.terminator.as_ref();
        // Back up so a terminator straddling the previous scan end is found.
        let start = self
            .scanned
            .min(buf.len())
            .saturating_sub(term.len() - 1);

        match find(&buf[start..], term) {
            Some(pos) => {
                self.scanned = 0;
                let frame_len = start + pos;
                Some(Extracted {
                    frame_len,
                    consumed: frame_len + term.len(),
                })
            }
            None => {
                self.scanned = buf.len();
                None
            }
        }
    }

    fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        dst.reserve(payload.len() + self.terminator.len());
        dst.put_slice(payload);
        dst.put_slice(&self.terminator);
        Ok(())
    }

    fn reset(&mut self) {
        self.scanned = 0;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Frames of a fixed, known length.
#[derive(Debug, Clone)]
pub struct FixedLengthFraming {
    length: usize,
}

impl FixedLengthFraming {
    /// Create a fixed-length strategy. The length must be non-zero.
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(FrameError::InvalidConfig("fixed frame length must be non-zero"));
        }
        Ok(Self { length })
    }

    /// The configured frame length.
    pub fn length(&self) -> usize {
        self.length
    }
}

impl FramingStrategy for FixedLengthFraming {
    fn extract(&mut self, buf: &[u8]) -> Option<Extracted> {
        (buf.len() >= self.length).then_some(Extracted {
            frame_len: self.length,
            consumed: self.length,
        })
    }

    fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        if payload.len() != self.length {
            return Err(FrameError::LengthMismatch {
                len: payload.len(),
                expected: self.length,
            });
        }
        dst.put_slice(payload);
        Ok(())
    }
}

/// Framing selected by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Terminated by the given byte sequence.
    Sentinel(Bytes),
    /// Exactly this many bytes per frame.
    FixedLength(usize),
}

impl Framing {
    /// Lines terminated by `\n`.
    pub fn line() -> Self {
        Self::Sentinel(Bytes::from_static(b"\n"))
    }

    /// Lines terminated by `\r\n`.
    pub fn crlf() -> Self {
        Self::Sentinel(Bytes::from_static(b"\r\n"))
    }

    /// Terminated by an arbitrary sequence.
    pub fn sentinel(terminator: impl Into<Bytes>) -> Self {
        Self::Sentinel(terminator.into())
    }

    /// Build the strategy this configuration describes.
    pub fn build(&self) -> Result<Box<dyn FramingStrategy>> {
        Ok(match self {
            Self::Sentinel(terminator) => Box::new(SentinelFraming::new(terminator.clone())?),
            Self::FixedLength(length) => Box::new(FixedLengthFraming::new(*length)?),
        })
    }
}

impl Default for Framing {
    fn default() -> Self {
        Self::line()
    }
}

/// Split the next frame off the head of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// `max_frame_size` bounds the wire size of one frame (delimiter included);
/// a buffer that outgrows it without a boundary is a `FrameTooLarge` error.
pub fn decode_frame<S>(strategy: &mut S, src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>>
where
    S: FramingStrategy + ?Sized,
{
    match strategy.extract(src) {
        Some(Extracted {
            frame_len,
            consumed,
        }) => {
            if consumed > max_frame_size {
                return Err(FrameError::FrameTooLarge {
                    size: consumed,
                    max: max_frame_size,
                });
            }
            let mut wire = src.split_to(consumed);
            wire.truncate(frame_len);
            Ok(Some(Frame {
                payload: wire.freeze(),
            }))
        }
        None if src.len() > max_frame_size => Err(FrameError::FrameTooLarge {
            size: src.len(),
            max: max_frame_size,
        }),
        None => Ok(None),
    }
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum wire size of one frame. Default: 1 MiB.
    pub max_frame_size: usize,
    /// Bytes requested from the stream per read. Default: 1024.
    pub read_chunk_size: usize,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            write_timeout: None,
        }
    }
}
