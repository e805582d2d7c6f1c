use std::time::Duration;

/// Errors that can occur during frame extraction and marshalling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffered bytes exceed the configured maximum without a frame boundary.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A payload does not have the length a fixed-length framing requires.
    #[error("payload length {len} does not match fixed frame length {expected}")]
    LengthMismatch { len: usize, expected: usize },

    /// A framing strategy was configured with unusable parameters.
    #[error("invalid framing configuration: {0}")]
    InvalidConfig(&'static str),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// No complete frame arrived before the deadline.
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, FrameError>;
