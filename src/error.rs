//! Error types for the WebSocket client.
//!
//! Every failure the client can report, from URL validation through the
//! handshake to protocol violations detected while reading frames.

use thiserror::Error;

use crate::message::CloseCode;
use crate::protocol::OpCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the WebSocket client.
///
/// Errors are `Clone` so the same failure can be delivered both to a
/// per-call completion callback and to the handler's error notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The connect target is not a valid `ws://` or `wss://` URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered the upgrade request with a non-101 status.
    #[error("Invalid handshake response status: {status}")]
    InvalidHandshakeResponse {
        /// Received HTTP status code.
        status: u16,
    },

    /// The upgrade response was a 101 but is otherwise unacceptable.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Connecting and upgrading did not finish within the timeout.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// `connect` was called while a connection is in progress or established.
    #[error("Already connected")]
    AlreadyConnected,

    /// The operation needs a live connection and there is none.
    #[error("Not connected")]
    Disconnected,

    /// A frame arrived that cannot extend the message being reassembled.
    #[error("Opcode mismatch: expected {expected}, got {got}")]
    OpcodeMismatch {
        /// Type of the message in progress.
        expected: OpCode,
        /// Opcode of the offending frame.
        got: OpCode,
    },

    /// The peer violated RFC 6455.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Specific RFC 6455 violations detected on inbound data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// Text message payload is not valid UTF-8.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Control frame with FIN=0.
    #[error("control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Continuation frame with no message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// RSV bits set while no extension is negotiated.
    #[error("reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Opcode 0x3-0x7 or 0xB-0xF.
    #[error("reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// A single frame is larger than the configured limit.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A reassembled message is larger than the configured limit.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A message is split into more fragments than allowed.
    #[error("too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count so far.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },
}

impl Error {
    /// Close code sent to the peer when this error aborts the connection.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::Protocol(ProtocolViolation::InvalidUtf8) => CloseCode::InvalidPayload,
            Error::Protocol(ProtocolViolation::MessageTooLarge { .. })
            | Error::Protocol(ProtocolViolation::FrameTooLarge { .. }) => CloseCode::MessageTooBig,
            Error::Protocol(_) | Error::OpcodeMismatch { .. } => CloseCode::ProtocolError,
            Error::Transport(_) | Error::ConnectTimeout => CloseCode::Abnormal,
            _ => CloseCode::Normal,
        }
    }

    /// Returns `true` for errors detected while validating inbound protocol data.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::OpcodeMismatch { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Error::ConnectTimeout
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::Protocol(ProtocolViolation::InvalidUtf8)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OpcodeMismatch {
            expected: OpCode::Text,
            got: OpCode::Binary,
        };
        assert_eq!(err.to_string(), "Opcode mismatch: expected Text, got Binary");

        let err = Error::InvalidHandshakeResponse { status: 404 };
        assert_eq!(err.to_string(), "Invalid handshake response status: 404");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Transport(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(Error::from(io_err), Error::ConnectTimeout);
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            Error::from(ProtocolViolation::InvalidUtf8).close_code(),
            CloseCode::InvalidPayload
        );
        assert_eq!(
            Error::from(ProtocolViolation::FragmentedControlFrame).close_code(),
            CloseCode::ProtocolError
        );
        assert_eq!(
            Error::from(ProtocolViolation::MessageTooLarge { size: 2, max: 1 }).close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            Error::OpcodeMismatch {
                expected: OpCode::Text,
                got: OpCode::Binary
            }
            .close_code(),
            CloseCode::ProtocolError
        );
    }

    #[test]
    fn test_is_protocol() {
        assert!(Error::from(ProtocolViolation::ReservedBitsSet).is_protocol());
        assert!(!Error::Disconnected.is_protocol());
        assert!(!Error::Transport("reset".into()).is_protocol());
    }

    #[test]
    fn test_error_clone() {
        let err = Error::Protocol(ProtocolViolation::InvalidUtf8);
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
