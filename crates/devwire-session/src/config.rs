use std::time::Duration;

use devwire_frame::{FrameConfig, Framing, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_CHUNK_SIZE};

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Telnet-mode settings.
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// Answer DO with WONT and WILL with DONT.
    pub refuse_options: bool,
    /// When set, a client reads once after connecting and discards the
    /// result. A server greeting therefore never reaches the first reply.
    pub banner_timeout: Option<Duration>,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            refuse_options: true,
            banner_timeout: None,
        }
    }
}

impl TelnetConfig {
    /// Override option refusal.
    pub fn with_refuse_options(mut self, refuse: bool) -> Self {
        self.refuse_options = refuse;
        self
    }

    /// Discard whatever the server sends within `timeout` of connecting.
    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = Some(timeout);
        self
    }
}

/// Session behavior configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How incoming bytes are split into frames.
    pub framing: Framing,
    /// How outgoing payloads are marshalled. Defaults to `framing`.
    pub outbound_framing: Option<Framing>,
    /// Maximum wire size of a single frame.
    pub max_frame_size: usize,
    /// Bound on each connection attempt.
    pub connect_timeout: Option<Duration>,
    /// Default bound on assembling one frame; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Bound on writing one message; `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Bytes requested from the stream per read.
    pub read_chunk_size: usize,
    /// Telnet escaping and negotiation handling; off when `None`.
    pub telnet: Option<TelnetConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            outbound_framing: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: None,
            write_timeout: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            telnet: None,
        }
    }
}

impl SessionConfig {
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_outbound_framing(mut self, framing: Framing) -> Self {
        self.outbound_framing = Some(framing);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_telnet(mut self, telnet: TelnetConfig) -> Self {
        self.telnet = Some(telnet);
        self
    }

    /// The framing used for outgoing payloads.
    pub fn outbound(&self) -> &Framing {
        self.outbound_framing.as_ref().unwrap_or(&self.framing)
    }

    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_frame_size: self.max_frame_size,
            read_chunk_size: self.read_chunk_size,
            write_timeout: self.write_timeout,
        }
    }
}
