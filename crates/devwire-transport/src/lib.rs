//! Byte-stream transport abstraction.
//!
//! This is the lowest layer of devwire. It knows nothing about messages:
//! it hands out connected, ordered, reliable byte channels and a way to
//! close them. Everything else builds on the [`ByteStream`] trait and the
//! TCP implementation provided here.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{connect, ShutdownHandle, TcpAcceptor, TcpByteStream};
pub use traits::{closed_error, ByteStream, CloseHandle};
