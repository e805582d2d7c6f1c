use bytes::BytesMut;

use crate::telnet::TelnetEvent;

/// Transforms bytes between the wire and the framing layer.
///
/// `encode` runs on a whole marshalled frame just before it is written;
/// `decode` runs on raw reads before the bytes reach the framing strategy.
/// Decoders must keep any mid-sequence state across calls.
pub trait WireCodec: Send {
    /// Escape outgoing bytes.
    fn encode(&mut self, src: &[u8], dst: &mut BytesMut);

    /// Unescape incoming bytes, dropping transport control sequences.
    fn decode(&mut self, src: &[u8], dst: &mut BytesMut);

    /// Return to the initial state.
    fn reset(&mut self) {}

    /// Drain control events observed while decoding.
    fn take_events(&mut self) -> Vec<TelnetEvent> {
        Vec::new()
    }
}

impl<C: WireCodec + ?Sized> WireCodec for Box<C> {
    fn encode(&mut self, src: &[u8], dst: &mut BytesMut) {
        (**self).encode(src, dst)
    }

    fn decode(&mut self, src: &[u8], dst: &mut BytesMut) {
        (**self).decode(src, dst)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn take_events(&mut self) -> Vec<TelnetEvent> {
        (**self).take_events()
    }
}

/// Passes bytes through unchanged; the plain TCP path.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl WireCodec for IdentityCodec {
    fn encode(&mut self, src: &[u8], dst: &mut BytesMut) {
        dst.extend_from_slice(src);
    }

    fn decode(&mut self, src: &[u8], dst: &mut BytesMut) {
        dst.extend_from_slice(src);
    }
}
