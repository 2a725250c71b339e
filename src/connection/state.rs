//! WebSocket client connection states.

use crate::message::CloseCode;

/// Lifecycle state of a client connection.
///
/// Exactly one state is active at a time. `Disconnected` is both the initial
/// and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection. Initial and terminal state.
    #[default]
    Disconnected,
    /// Transport connect and opening handshake in flight.
    Connecting,
    /// Open; data may flow in both directions.
    Connected,
    /// Close in progress. Carries the code reported once the close completes.
    Disconnecting(CloseCode),
}

impl ConnectionState {
    /// Returns `true` only for `Connected`.
    #[must_use]
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns `true` only for `Connecting`.
    #[must_use]
    #[inline]
    pub const fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    /// Returns `true` only for `Disconnected`.
    #[must_use]
    #[inline]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// The pending close code while `Disconnecting`.
    #[must_use]
    #[inline]
    pub const fn pending_close(&self) -> Option<CloseCode> {
        match self {
            ConnectionState::Disconnecting(code) => Some(*code),
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::Connected => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting(code) => write!(f, "Disconnecting({code})"),
        }
    }
}
