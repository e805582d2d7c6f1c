//! Client and server sessions over framed device byte streams.
//!
//! A [`Session`] owns one connection, its receive buffer and its wire codec
//! state. Clients open one with [`connect`]; servers get one per accepted
//! connection from a [`SessionListener`], or hand a request handler to a
//! [`Server`].

pub mod config;
pub mod connector;
pub mod error;
pub mod listener;
pub mod server;
pub mod session;

#[cfg(feature = "async")]
pub mod async_session;

#[cfg(feature = "async")]
pub use async_session::AsyncSession;
pub use config::{SessionConfig, TelnetConfig, DEFAULT_CONNECT_TIMEOUT};
pub use connector::{connect, connect_with_config};
pub use error::{Result, SessionError};
pub use listener::SessionListener;
pub use server::{Server, ServerHandle};
pub use session::{Role, Session};
