//! `tokio_util::codec` adapter for the framing strategies.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, Frame, Framing, FramingStrategy, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::telnet::TelnetEvent;
use crate::wire::{IdentityCodec, WireCodec};

/// Item accepted by [`FrameCodec`]'s encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A payload to marshal and escape.
    Payload(Bytes),
    /// Bytes that are already marshalled; escaped only.
    Marshalled(Bytes),
    /// Bytes written exactly as given.
    Raw(Bytes),
}

/// Decodes frames and encodes payloads for use with `tokio_util::codec::Framed`.
pub struct FrameCodec {
    inbound: Box<dyn FramingStrategy>,
    outbound: Box<dyn FramingStrategy>,
    wire: Box<dyn WireCodec>,
    decoded: BytesMut,
    marshalled: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec using `framing` in both directions.
    pub fn new(framing: &Framing) -> Result<Self> {
        Self::with_parts(
            framing.build()?,
            framing.build()?,
            Box::new(IdentityCodec),
            DEFAULT_MAX_FRAME_SIZE,
        )
    }

    /// Create a codec from explicit parts.
    pub fn with_parts(
        inbound: Box<dyn FramingStrategy>,
        outbound: Box<dyn FramingStrategy>,
        wire: Box<dyn WireCodec>,
        max_frame_size: usize,
    ) -> Result<Self> {
        if max_frame_size == 0 {
            return Err(FrameError::InvalidConfig("max frame size must be non-zero"));
        }
        Ok(Self {
            inbound,
            outbound,
            wire,
            decoded: BytesMut::new(),
            marshalled: BytesMut::new(),
            max_frame_size,
        })
    }

    /// Drain control events seen while decoding.
    pub fn take_events(&mut self) -> Vec<TelnetEvent> {
        self.wire.take_events()
    }

    /// Decoded bytes not yet returned as a frame.
    pub fn buffered(&self) -> &[u8] {
        self.decoded.as_ref()
    }

    /// Drop decoded bytes and the inbound scan state, keeping the wire
    /// codec's state.
    pub fn discard_buffered(&mut self) {
        self.decoded.clear();
        self.inbound.reset();
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if !src.is_empty() {
            let raw = src.split();
            self.wire.decode(&raw, &mut self.decoded);
        }
        decode_frame(&mut self.inbound, &mut self.decoded, self.max_frame_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.decoded.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Outbound> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<()> {
        match item {
            Outbound::Payload(payload) => {
                self.marshalled.clear();
                self.outbound.encode(&payload, &mut self.marshalled)?;
                self.wire.encode(&self.marshalled, dst);
            }
            Outbound::Marshalled(bytes) => self.wire.encode(&bytes, dst),
            Outbound::Raw(bytes) => dst.extend_from_slice(&bytes),
        }
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        Encoder::<Outbound>::encode(self, Outbound::Payload(payload), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::{TelnetCodec, DO, IAC};

    #[test]
    fn decodes_across_partial_buffers() {
        let mut codec = FrameCodec::new(&Framing::crlf()).unwrap();
        let mut src = BytesMut::from(&b"*IDN?\r"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(b"\nRST");
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"*IDN?");
        assert_eq!(codec.buffered(), b"RST");
    }

    #[test]
    fn eof_with_partial_frame_is_error() {
        let mut codec = FrameCodec::new(&Framing::line()).unwrap();
        let mut src = BytesMut::from(&b"partial"[..]);
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn eof_with_empty_buffer_is_clean() {
        let mut codec = FrameCodec::new(&Framing::line()).unwrap();
        let mut src = BytesMut::new();
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn encodes_frames_and_raw_bytes() {
        let mut codec = FrameCodec::with_parts(
            Framing::line().build().unwrap(),
            Framing::line().build().unwrap(),
            Box::new(TelnetCodec::new()),
            64,
        )
        .unwrap();
        let mut dst = BytesMut::new();

        codec
            .encode(Outbound::Payload(Bytes::from_static(&[b'a', IAC])), &mut dst)
            .unwrap();
        codec
            .encode(Outbound::Marshalled(Bytes::from_static(&[IAC, b'\n'])), &mut dst)
            .unwrap();
        codec
            .encode(Outbound::Raw(Bytes::from_static(&[IAC, DO, 1])), &mut dst)
            .unwrap();
        assert_eq!(
            dst.as_ref(),
            &[b'a', IAC, IAC, b'\n', IAC, IAC, b'\n', IAC, DO, 1]
        );
    }

    #[test]
    fn telnet_events_surface_through_codec() {
        let mut codec = FrameCodec::with_parts(
            Framing::line().build().unwrap(),
            Framing::line().build().unwrap(),
            Box::new(TelnetCodec::new()),
            64,
        )
        .unwrap();
        let mut src = BytesMut::from(&[b'o', IAC, DO, 24, b'k', b'\n'][..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"ok");
        assert_eq!(codec.take_events().len(), 1);
    }

    #[test]
    fn discard_buffered_keeps_wire_state() {
        let mut codec = FrameCodec::with_parts(
            Framing::line().build().unwrap(),
            Framing::line().build().unwrap(),
            Box::new(TelnetCodec::new()),
            64,
        )
        .unwrap();
        let mut src = BytesMut::from(&b"login> "[..]);
        src.extend_from_slice(&[IAC, DO]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        codec.discard_buffered();
        assert!(codec.buffered().is_empty());

        let mut src = BytesMut::from(&b"\x18OK\n"[..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"OK");
        assert_eq!(codec.take_events().len(), 1);
    }

    #[test]
    fn oversized_stream_is_rejected() {
        let mut codec = FrameCodec::with_parts(
            Framing::line().build().unwrap(),
            Framing::line().build().unwrap(),
            Box::new(IdentityCodec),
            4,
        )
        .unwrap();
        let mut src = BytesMut::from(&b"toolong"[..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::FrameTooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(64);
        let mut client = Framed::new(client, FrameCodec::new(&Framing::line()).unwrap());
        let mut server = Framed::new(server, FrameCodec::new(&Framing::line()).unwrap());

        client.send(Bytes::from_static(b"hello")).await.unwrap();
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");
    }
}
