use std::time::Duration;

use devwire_frame::FrameError;
use devwire_transport::TransportError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connecting, binding, accepting or talking to the peer failed.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// The session was closed locally or by the peer.
    #[error("session closed")]
    Closed,

    /// No complete frame arrived in time. Buffered bytes are kept.
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),

    /// The peer sent more than the configured maximum without a boundary.
    /// The session has been closed.
    #[error("frame too large ({size} bytes, max {max}); session closed")]
    FrameTooLarge { size: usize, max: usize },

    /// Any other framing error, such as a fixed-length size mismatch.
    #[error("frame error: {0}")]
    Frame(FrameError),
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Timeout(timeout) => Self::Timeout(timeout),
            FrameError::FrameTooLarge { size, max } => Self::FrameTooLarge { size, max },
            FrameError::ConnectionClosed => Self::Closed,
            FrameError::Io(io) => Self::Connection(TransportError::Io(io)),
            other => Self::Frame(other),
        }
    }
}

impl SessionError {
    /// Whether the session can still be used after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Frame(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_map_to_session_taxonomy() {
        let timeout = Duration::from_millis(5);
        assert!(matches!(
            SessionError::from(FrameError::Timeout(timeout)),
            SessionError::Timeout(t) if t == timeout
        ));
        assert!(matches!(
            SessionError::from(FrameError::FrameTooLarge { size: 9, max: 8 }),
            SessionError::FrameTooLarge { size: 9, max: 8 }
        ));
        assert!(matches!(
            SessionError::from(FrameError::ConnectionClosed),
            SessionError::Closed
        ));
        assert!(matches!(
            SessionError::from(FrameError::LengthMismatch { len: 1, expected: 2 }),
            SessionError::Frame(_)
        ));
        assert!(matches!(
            SessionError::from(FrameError::Io(std::io::Error::other("reset"))),
            SessionError::Connection(_)
        ));
    }

    #[test]
    fn only_timeouts_and_marshalling_errors_are_recoverable() {
        assert!(SessionError::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(SessionError::Frame(FrameError::InvalidConfig("x")).is_recoverable());
        assert!(!SessionError::Closed.is_recoverable());
        assert!(!SessionError::FrameTooLarge { size: 2, max: 1 }.is_recoverable());
    }
}
