//! Error types for weft sessions and streams.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::transport::FrameError;

/// Numeric error code carried by StreamReset and GoAway frames.
///
/// Unknown values received from a peer are preserved as-is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Clean, mutually agreed shutdown.
    pub const NO_ERROR: Self = Self(0x00);
    /// Peer violated the protocol.
    pub const PROTOCOL_ERROR: Self = Self(0x01);
    /// Local implementation failure.
    pub const INTERNAL_ERROR: Self = Self(0x02);
    /// Flow-control window overrun or overflow.
    pub const FLOW_CONTROL_ERROR: Self = Self(0x03);
    /// Frame received for a half that is already closed.
    pub const STREAM_CLOSED: Self = Self(0x04);
    /// Stream was not processed by the peer and may be retried.
    pub const STREAM_REFUSED: Self = Self(0x05);
    /// Stream was closed by its owner before finishing gracefully.
    pub const STREAM_CANCELLED: Self = Self(0x06);
    /// Frame exceeds the configured size or has a bad fixed length.
    pub const FRAME_SIZE_ERROR: Self = Self(0x08);
    /// Peer had too many un-accepted streams.
    pub const ACCEPT_QUEUE_FULL: Self = Self(0x09);
    /// Peer sent GoAway with an error.
    pub const REMOTE_GONE_AWAY: Self = Self(0x0B);
    /// No stream ids left to allocate.
    pub const STREAMS_EXHAUSTED: Self = Self(0x0C);
    /// A transport write did not finish in time.
    pub const WRITE_TIMEOUT: Self = Self(0x0D);
    /// The session was already closed.
    pub const SESSION_CLOSED: Self = Self(0x0E);
    /// Transport reached end-of-file without a GoAway exchange.
    pub const PEER_EOF: Self = Self(0x0F);
    /// Transport I/O failed.
    pub const TRANSPORT_ERROR: Self = Self(0x10);
    /// Peer did not answer our GoAway in time.
    pub const SHUTDOWN_TIMEOUT: Self = Self(0x11);

    /// Wrap a raw wire value.
    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::NO_ERROR => "NO_ERROR",
            Self::PROTOCOL_ERROR => "PROTOCOL_ERROR",
            Self::INTERNAL_ERROR => "INTERNAL_ERROR",
            Self::FLOW_CONTROL_ERROR => "FLOW_CONTROL_ERROR",
            Self::STREAM_CLOSED => "STREAM_CLOSED",
            Self::STREAM_REFUSED => "STREAM_REFUSED",
            Self::STREAM_CANCELLED => "STREAM_CANCELLED",
            Self::FRAME_SIZE_ERROR => "FRAME_SIZE_ERROR",
            Self::ACCEPT_QUEUE_FULL => "ACCEPT_QUEUE_FULL",
            Self::REMOTE_GONE_AWAY => "REMOTE_GONE_AWAY",
            Self::STREAMS_EXHAUSTED => "STREAMS_EXHAUSTED",
            Self::WRITE_TIMEOUT => "WRITE_TIMEOUT",
            Self::SESSION_CLOSED => "SESSION_CLOSED",
            Self::PEER_EOF => "PEER_EOF",
            Self::TRANSPORT_ERROR => "TRANSPORT_ERROR",
            Self::SHUTDOWN_TIMEOUT => "SHUTDOWN_TIMEOUT",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:x}", self.0),
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({self})")
    }
}

impl From<u32> for ErrorCode {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Errors surfaced by sessions and streams.
///
/// Cloneable so one terminal error can be handed to every caller released by
/// a teardown.
#[derive(Debug, Error, Clone)]
pub enum MuxError {
    /// Structurally invalid frame. Session-fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Well-formed frame that breaks stream or session rules. Session-fatal.
    #[error("protocol violation ({code}): {reason}")]
    ProtocolViolation {
        /// Code reported to the peer.
        code: ErrorCode,
        /// What went wrong.
        reason: String,
    },

    /// The stream was reset, by the peer or by a GoAway refusal.
    #[error("stream reset ({0})")]
    StreamReset(ErrorCode),

    /// The stream half is closed for this operation.
    #[error("stream closed")]
    StreamClosed,

    /// The session has shut down.
    #[error("session closed ({0})")]
    SessionClosed(ErrorCode),

    /// All stream ids of this side's parity have been used.
    #[error("stream ids exhausted")]
    StreamsExhausted,

    /// A transport write exceeded the configured write timeout.
    #[error("transport write timed out")]
    WriteTimeout,

    /// Transport I/O failed. Session-fatal.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),
}

impl MuxError {
    /// Build a protocol violation error.
    pub fn violation(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            code,
            reason: reason.into(),
        }
    }

    /// Numeric code describing this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            MuxError::MalformedFrame(e) => e.code(),
            MuxError::ProtocolViolation { code, .. } => *code,
            MuxError::StreamReset(code) => *code,
            MuxError::StreamClosed => ErrorCode::STREAM_CLOSED,
            MuxError::SessionClosed(code) => *code,
            MuxError::StreamsExhausted => ErrorCode::STREAMS_EXHAUSTED,
            MuxError::WriteTimeout => ErrorCode::WRITE_TIMEOUT,
            MuxError::Transport(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                ErrorCode::PEER_EOF
            }
            MuxError::Transport(_) => ErrorCode::TRANSPORT_ERROR,
        }
    }

    /// Whether this error concerns the whole session rather than one stream.
    pub fn is_session_error(&self) -> bool {
        !matches!(self, MuxError::StreamReset(_) | MuxError::StreamClosed)
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            MuxError::StreamReset(_) => io::ErrorKind::ConnectionReset,
            MuxError::StreamClosed => io::ErrorKind::BrokenPipe,
            MuxError::SessionClosed(_) | MuxError::StreamsExhausted => {
                io::ErrorKind::NotConnected
            }
            MuxError::WriteTimeout => io::ErrorKind::TimedOut,
            MuxError::Transport(e) => e.kind(),
            MuxError::MalformedFrame(_) | MuxError::ProtocolViolation { .. } => {
                io::ErrorKind::InvalidData
            }
        }
    }
}

impl From<io::Error> for MuxError {
    fn from(err: io::Error) -> Self {
        // Round-trip errors that started life as a MuxError.
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<MuxError>()) {
            return inner.clone();
        }
        MuxError::Transport(Arc::new(err))
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

/// Result type for session and stream operations.
pub type MuxResult<T> = Result<T, MuxError>;

/// Extract the numeric code from an error returned by this crate.
///
/// Returns `(code, is_session_error)`. Works on [`MuxError`] directly and on
/// `io::Error` values produced by a stream's `AsyncRead`/`AsyncWrite`
/// implementation. Any other error reports `INTERNAL_ERROR`, not
/// session-scoped.
pub fn get_error(err: &(dyn StdError + 'static)) -> (ErrorCode, bool) {
    if let Some(mux) = err.downcast_ref::<MuxError>() {
        return (mux.code(), mux.is_session_error());
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        let mux = match io_err.get_ref().and_then(|e| e.downcast_ref::<MuxError>()) {
            Some(inner) => inner.clone(),
            None => MuxError::Transport(Arc::new(io::Error::from(io_err.kind()))),
        };
        return (mux.code(), mux.is_session_error());
    }
    (ErrorCode::INTERNAL_ERROR, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::NO_ERROR.to_string(), "NO_ERROR");
        assert_eq!(ErrorCode::FLOW_CONTROL_ERROR.to_string(), "FLOW_CONTROL_ERROR");
        assert_eq!(ErrorCode::from_u32(0xbeef).to_string(), "0xbeef");
        assert_eq!(ErrorCode::from(0x0F), ErrorCode::PEER_EOF);
    }

    #[test]
    fn test_stream_errors_are_not_session_errors() {
        assert!(!MuxError::StreamClosed.is_session_error());
        assert!(!MuxError::StreamReset(ErrorCode::STREAM_CANCELLED).is_session_error());

        assert!(MuxError::SessionClosed(ErrorCode::NO_ERROR).is_session_error());
        assert!(MuxError::WriteTimeout.is_session_error());
        assert!(MuxError::violation(ErrorCode::PROTOCOL_ERROR, "bad").is_session_error());
    }

    #[test]
    fn test_transport_codes() {
        let eof = MuxError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(eof.code(), ErrorCode::PEER_EOF);

        let reset = MuxError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.code(), ErrorCode::TRANSPORT_ERROR);
        assert!(reset.is_session_error());
    }

    #[test]
    fn test_io_round_trip_keeps_variant() {
        let original = MuxError::StreamReset(ErrorCode::STREAM_REFUSED);
        let io_err: io::Error = original.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);

        let back = MuxError::from(io_err);
        assert!(matches!(back, MuxError::StreamReset(ErrorCode::STREAM_REFUSED)));
    }

    #[test]
    fn test_get_error() {
        let err = MuxError::SessionClosed(ErrorCode::NO_ERROR);
        assert_eq!(get_error(&err), (ErrorCode::NO_ERROR, true));

        let io_err: io::Error = MuxError::StreamClosed.into();
        assert_eq!(get_error(&io_err), (ErrorCode::STREAM_CLOSED, false));

        let plain = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(get_error(&plain), (ErrorCode::PEER_EOF, true));

        let other = std::fmt::Error;
        assert_eq!(get_error(&other), (ErrorCode::INTERNAL_ERROR, false));
    }
}
