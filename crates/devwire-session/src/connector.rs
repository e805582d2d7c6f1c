use std::fmt;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::{Role, Session};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Connect to a device server with default configuration.
pub fn connect<A>(addr: A) -> Result<Session>
where
    A: ToSocketAddrs + fmt::Display,
{
    connect_with_config(addr, SessionConfig::default())
}

/// Connect with explicit configuration.
///
/// Every resolved address is tried with `connect_timeout`. In Telnet mode
/// with a banner timeout, the greeting is read and dropped before returning.
pub fn connect_with_config<A>(addr: A, config: SessionConfig) -> Result<Session>
where
    A: ToSocketAddrs + fmt::Display,
{
    let described = addr.to_string();
    let stream = devwire_transport::connect(addr, config.connect_timeout)?;
    let id = format!("client-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
    info!(session = %id, addr = %described, telnet = config.telnet.is_some(), "connected");

    let banner_timeout = config.telnet.as_ref().and_then(|telnet| telnet.banner_timeout);
    let mut session = Session::from_stream(id, Role::Client, stream, config)?;
    if let Some(timeout) = banner_timeout {
        session.discard_banner(timeout)?;
    }
    Ok(session)
}
