//! Message framing for line-oriented and fixed-record device protocols.
//!
//! Incoming bytes pass through a wire codec (identity, or Telnet
//! unescaping) and are then split into frames by a framing strategy:
//! - sentinel framing, where each frame ends with a terminator such as `\n`
//! - fixed-length framing, where every frame is exactly N bytes
//!
//! Partial frames stay buffered across reads and across timeouts, so callers
//! only ever see complete payloads.

pub mod codec;
pub mod error;
pub mod reader;
pub mod telnet;
pub mod wire;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::{FrameCodec, Outbound};
pub use codec::{
    decode_frame, Extracted, FixedLengthFraming, Frame, FrameConfig, Framing, FramingStrategy,
    SentinelFraming, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_CHUNK_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{Deadline, FrameReader};
pub use telnet::{refusal, TelnetCodec, TelnetCommand, TelnetEvent};
pub use wire::{IdentityCodec, WireCodec};
pub use writer::FrameWriter;
