use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use devwire_transport::{ByteStream, TransportError};
use tracing::debug;

use crate::codec::{decode_frame, Frame, FrameConfig, FramingStrategy};
use crate::error::{FrameError, Result};
use crate::telnet::TelnetEvent;
use crate::wire::{IdentityCodec, WireCodec};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// The point in time by which a frame must be complete.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    timeout: Option<Duration>,
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `timeout` from now; `None` never expires.
    ///
    /// A timeout too large to represent as an `Instant` never expires either.
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            at: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self::after(None)
    }

    /// Time left, or `FrameError::Timeout` once the deadline has passed.
    pub fn remaining(&self) -> Result<Option<Duration>> {
        match (self.at, self.timeout) {
            (Some(at), Some(timeout)) => {
                let now = Instant::now();
                if now >= at {
                    return Err(FrameError::Timeout(timeout));
                }
                Ok(Some(at - now))
            }
            _ => Ok(None),
        }
    }
}

/// Reads complete frames from any `Read` stream.
///
/// Raw reads pass through the wire codec into an internal buffer; the
/// framing strategy then carves frames off its head. Bytes that arrive after
/// a frame boundary stay buffered for the next call, and so do partial
/// frames left behind by a timeout.
pub struct FrameReader<T> {
    inner: T,
    chunk: Vec<u8>,
    buf: BytesMut,
    strategy: Box<dyn FramingStrategy>,
    codec: Box<dyn WireCodec>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a frame reader with the identity codec and default configuration.
    pub fn new(inner: T, strategy: Box<dyn FramingStrategy>) -> Self {
        Self::with_config(inner, strategy, Box::new(IdentityCodec), FrameConfig::default())
    }

    /// Create a frame reader with explicit codec and configuration.
    pub fn with_config(
        inner: T,
        strategy: Box<dyn FramingStrategy>,
        codec: Box<dyn WireCodec>,
        config: FrameConfig,
    ) -> Self {
        Self {
            inner,
            chunk: vec![0u8; config.read_chunk_size.max(1)],
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            strategy,
            codec,
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Take the next frame out of the buffer without reading.
    pub fn try_decode(&mut self) -> Result<Option<Frame>> {
        let frame = decode_frame(&mut self.strategy, &mut self.buf, self.config.max_frame_size)?;
        if let Some(frame) = &frame {
            debug!(len = frame.len(), buffered = self.buf.len(), "frame assembled");
        }
        Ok(frame)
    }

    /// Perform one read and append the decoded bytes to the buffer.
    ///
    /// Returns the number of raw bytes read. EOF is
    /// `Err(FrameError::ConnectionClosed)`; timeouts surface as `Io` errors
    /// of kind `WouldBlock` or `TimedOut`.
    pub fn fill(&mut self) -> Result<usize> {
        loop {
            let read = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            debug!(read, "received bytes");
            self.codec.decode(&self.chunk[..read], &mut self.buf);
            return Ok(read);
        }
    }

    /// Decoded bytes not yet returned as a frame.
    pub fn buffered(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Drain control events seen by the wire codec.
    pub fn take_events(&mut self) -> Vec<TelnetEvent> {
        self.codec.take_events()
    }

    /// Drop buffered bytes and reset the strategy's scan state.
    ///
    /// The wire codec keeps its state, so a control sequence split across
    /// the discarded bytes and the next read still decodes.
    pub fn discard_buffered(&mut self) {
        if !self.buf.is_empty() {
            debug!(discarded = self.buf.len(), "dropping buffered bytes");
        }
        self.buf.clear();
        self.strategy.reset();
    }

    /// Drop buffered bytes and reset strategy and codec state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.strategy.reset();
        self.codec.reset();
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum frame size for subsequent frame extraction.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: ByteStream> FrameReader<T> {
    /// Read the next frame, giving up once `timeout` has elapsed.
    ///
    /// The timeout bounds the whole assembly, not each read. On timeout the
    /// bytes read so far stay buffered, so a later call picks up where this
    /// one stopped.
    pub fn read_frame_within(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(frame);
            }
            self.fill_before(&deadline)?;
        }
    }

    /// Perform one read that returns no later than `deadline`.
    pub fn fill_before(&mut self, deadline: &Deadline) -> Result<usize> {
        loop {
            let remaining = deadline.remaining()?;
            self.inner
                .set_read_timeout(remaining)
                .map_err(transport_to_frame_error)?;
            match self.fill() {
                Err(FrameError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                other => return other,
            }
        }
    }
}

fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io::{Cursor, Write};

    use devwire_transport::CloseHandle;

    use super::*;
    use crate::codec::{FixedLengthFraming, SentinelFraming};
    use crate::telnet::{TelnetCodec, TelnetCommand, DO, IAC, WILL};

    fn line() -> Box<dyn FramingStrategy> {
        Box::new(SentinelFraming::new(&b"\n"[..]).unwrap())
    }

    /// One scripted outcome of a read call.
    enum Step {
        Data(Vec<u8>),
        Stall,
    }

    /// A `ByteStream` that replays scripted reads and records writes.
    struct ScriptedStream {
        steps: VecDeque<Step>,
        read_timeout: Cell<Option<Duration>>,
        written: Vec<u8>,
        handle: CloseHandle,
    }

    impl ScriptedStream {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                read_timeout: Cell::new(None),
                written: Vec::new(),
                handle: CloseHandle::new(),
            }
        }

        fn push(&mut self, step: Step) {
            self.steps.push_back(step);
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.steps.push_front(Step::Data(bytes.split_off(n)));
                    }
                    Ok(n)
                }
                Some(Step::Stall) | None => {
                    std::thread::sleep(self.read_timeout.get().unwrap_or(Duration::from_millis(5)));
                    Err(std::io::Error::from(ErrorKind::WouldBlock))
                }
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for ScriptedStream {
        fn set_read_timeout(&self, timeout: Option<Duration>) -> devwire_transport::Result<()> {
            self.read_timeout.set(timeout);
            Ok(())
        }

        fn set_write_timeout(&self, _timeout: Option<Duration>) -> devwire_transport::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> devwire_transport::Result<Self> {
            Err(std::io::Error::from(ErrorKind::Unsupported).into())
        }

        fn close_handle(&self) -> CloseHandle {
            self.handle.clone()
        }
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(b"PING\n".to_vec()), line());
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"PING");
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(b"one\ntwo\nthree\n".to_vec()), line());

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!(f1.payload.as_ref(), b"one");
        assert_eq!(f2.payload.as_ref(), b"two");
        assert_eq!(f3.payload.as_ref(), b"three");
    }

    #[test]
    fn read_frame_larger_than_chunk() {
        let mut wire = vec![0xAB; 64 * 1024];
        wire.push(b'\n');

        let mut reader = FrameReader::new(Cursor::new(wire.clone()), line());
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.len(), 64 * 1024);
        assert_eq!(frame.payload.as_ref(), &wire[..wire.len() - 1]);
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: b"slow\r\n".to_vec(),
            pos: 0,
        };
        let strategy = Box::new(SentinelFraming::new(&b"\r\n"[..]).unwrap());
        let mut reader = FrameReader::new(byte_reader, strategy);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn terminator_split_matches_single_read() {
        let wire = b"MEAS:VOLT?\r\n".to_vec();
        for split in 1..wire.len() {
            let stream = ScriptedStream::new(vec![
                Step::Data(wire[..split].to_vec()),
                Step::Data(wire[split..].to_vec()),
            ]);
            let strategy = Box::new(SentinelFraming::new(&b"\r\n"[..]).unwrap());
            let mut reader = FrameReader::new(stream, strategy);
            let frame = reader.read_frame_within(Some(Duration::from_secs(1))).unwrap();
            assert_eq!(frame.payload.as_ref(), b"MEAS:VOLT?", "split at {split}");
            assert!(reader.buffered().is_empty());
        }
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()), line());
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut reader = FrameReader::new(Cursor::new(b"only-part".to_vec()), line());
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert_eq!(reader.buffered(), b"only-part");
    }

    #[test]
    fn oversized_frame_in_stream() {
        let cfg = FrameConfig {
            max_frame_size: 16,
            read_chunk_size: 4,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(
            Cursor::new(vec![b'x'; 1024]),
            line(),
            Box::new(IdentityCodec),
            cfg,
        );
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { max: 16, .. }));
    }

    #[test]
    fn fixed_length_frames_from_stream() {
        let strategy = Box::new(FixedLengthFraming::new(3).unwrap());
        let mut reader = FrameReader::new(Cursor::new(b"abcdef".to_vec()), strategy);

        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"abc");
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"def");
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn telnet_codec_strips_negotiation_before_framing() {
        let mut wire = b"HEL".to_vec();
        wire.extend_from_slice(&[IAC, DO, 1]);
        wire.extend_from_slice(b"LO\n");
        wire.extend_from_slice(&[IAC, WILL]);
        wire.extend_from_slice(&[3]);
        wire.extend_from_slice(b"AGAIN\n");

        let mut reader = FrameReader::with_config(
            ByteByByteReader { bytes: wire, pos: 0 },
            line(),
            Box::new(TelnetCodec::new()),
            FrameConfig::default(),
        );

        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"HELLO");
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"AGAIN");

        let events = reader.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            TelnetEvent::Negotiation {
                command: TelnetCommand::Do,
                option: 1
            }
        ));
    }

    #[test]
    fn telnet_escaped_terminator_byte_is_payload() {
        // An escaped IAC that precedes the terminator stays in the payload.
        let wire = vec![b'a', IAC, IAC, b'\n'];
        let mut reader = FrameReader::with_config(
            Cursor::new(wire),
            line(),
            Box::new(TelnetCodec::new()),
            FrameConfig::default(),
        );
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), &[b'a', IAC]);
    }

    #[test]
    fn timeout_preserves_partial_frame() {
        let stream = ScriptedStream::new(vec![Step::Data(b"PAR".to_vec()), Step::Stall]);
        let mut reader = FrameReader::new(stream, line());

        let err = reader
            .read_frame_within(Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
        assert_eq!(reader.buffered(), b"PAR");

        reader.get_mut().push(Step::Data(b"TIAL\nNEXT".to_vec()));
        let frame = reader
            .read_frame_within(Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"PARTIAL");
        assert_eq!(reader.buffered(), b"NEXT");
    }

    #[test]
    fn buffered_frame_returns_without_reading() {
        let stream = ScriptedStream::new(vec![Step::Data(b"A\nB\n".to_vec())]);
        let mut reader = FrameReader::new(stream, line());

        assert_eq!(
            reader.read_frame_within(Some(Duration::from_millis(100))).unwrap().payload.as_ref(),
            b"A"
        );
        // Script is exhausted; the second frame must come from the buffer.
        assert_eq!(
            reader.read_frame_within(Some(Duration::from_millis(100))).unwrap().payload.as_ref(),
            b"B"
        );
    }

    #[test]
    fn reset_drops_buffer() {
        let mut reader = FrameReader::new(Cursor::new(b"half".to_vec()), line());
        let _ = reader.read_frame();
        reader.reset();
        assert!(reader.buffered().is_empty());
    }

    #[test]
    fn discard_buffered_keeps_telnet_state() {
        let stream = ScriptedStream::new(vec![Step::Data(vec![b'h', b'i', IAC, DO]), Step::Stall]);
        let mut reader = FrameReader::with_config(
            stream,
            line(),
            Box::new(TelnetCodec::new()),
            FrameConfig::default(),
        );

        let err = reader
            .read_frame_within(Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
        reader.discard_buffered();
        assert!(reader.buffered().is_empty());

        reader.get_mut().push(Step::Data(b"\x01OK\n".to_vec()));
        let frame = reader
            .read_frame_within(Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"OK");
        assert!(matches!(
            reader.take_events()[..],
            [TelnetEvent::Negotiation {
                command: TelnetCommand::Do,
                option: 1
            }]
        ));
    }

    #[test]
    fn huge_timeout_never_expires() {
        let deadline = Deadline::after(Some(Duration::MAX));
        assert!(deadline.remaining().unwrap().is_none());

        let stream = ScriptedStream::new(vec![Step::Stall, Step::Data(b"LATE\n".to_vec())]);
        let mut reader = FrameReader::new(stream, line());
        let frame = reader.read_frame_within(Some(Duration::MAX)).unwrap();
        assert_eq!(frame.payload.as_ref(), b"LATE");
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor, line());

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        reader.set_max_frame_size(8);
        assert_eq!(reader.config().max_frame_size, 8);
        let _inner = reader.into_inner();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: b"ok\n".to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader, line());
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: b"ok\n".to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader, line());
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            copy_remaining(&self.bytes, &mut self.pos, buf)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            copy_remaining(&self.bytes, &mut self.pos, buf)
        }
    }

    fn copy_remaining(bytes: &[u8], pos: &mut usize, buf: &mut [u8]) -> std::io::Result<usize> {
        if *pos >= bytes.len() {
            return Ok(0);
        }
        let n = (bytes.len() - *pos).min(buf.len());
        buf[..n].copy_from_slice(&bytes[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    #[test]
    fn roundtrip_over_tcp_loopback() {
        let acceptor = devwire_transport::TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr();

        let client = std::thread::spawn(move || {
            let stream = devwire_transport::connect(addr, Some(Duration::from_secs(2))).unwrap();
            let mut writer = crate::writer::FrameWriter::new(stream, line());
            writer.send(b"ping").unwrap();
        });

        let stream = acceptor.accept().unwrap();
        let mut reader = FrameReader::new(stream, line());
        let frame = reader
            .read_frame_within(Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"ping");

        client.join().unwrap();
    }
}
