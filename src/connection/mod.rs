//! Client connection lifecycle.
//!
//! A [`WebSocket`] is a handle onto a single connection task that owns every
//! piece of connection state: the [`ConnectionState`], the frame reassembler,
//! the liveness monitor and the pending close. Application calls are queued
//! to that task in order; events flow back out through a
//! [`WebSocketHandler`].
//!
//! ## Connection Lifecycle
//!
//! 1. **Disconnected** - initial state, and again after every connection ends
//! 2. **Connecting** - TCP, TLS and the HTTP upgrade are in flight
//! 3. **Connected** - messages flow, pings run if configured
//! 4. **Disconnecting** - close frame sent, waiting for the peer to confirm

mod close;
mod dispatcher;
mod liveness;
mod machine;
mod scheduler;
mod state;
mod websocket;

pub use dispatcher::{SentCallback, WebSocketHandler};
pub use state::ConnectionState;
pub use websocket::{Builder, EventLoop, WebSocket};
