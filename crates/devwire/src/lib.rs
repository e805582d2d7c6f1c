//! Framed TCP and Telnet sessions for talking to hardware devices.
//!
//! Many instruments and device servers speak a line- or record-oriented
//! protocol over a raw TCP socket or a Telnet port. devwire turns such a
//! byte stream into whole request and response messages.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams, TCP connect and accept
//! - [`frame`]: sentinel and fixed-length framing, Telnet escaping
//! - [`session`]: client and server sessions, listener and request server
//!   (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use devwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use devwire_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use devwire_session::*;
}
