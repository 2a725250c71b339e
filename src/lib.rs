//! # rsws-client - RFC 6455 WebSocket client engine
//!
//! `rsws-client` drives a single client WebSocket connection: the opening
//! handshake, message reassembly, ping/pong liveness supervision and the
//! close handshake, on top of Tokio.
//!
//! ## Features
//!
//! - **Single-task state machine**: every state change happens on one task,
//!   application calls are queued to it in order
//! - **Fragment reassembly** with UTF-8 validation and resource limits
//! - **Liveness monitor** that closes with 1006 when a ping goes unanswered
//! - **Close handshake** in both directions, with a confirmation timeout
//! - **TLS** for `wss://` behind the `tls-rustls` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsws_client::{CloseCode, Config, Data, WebSocket, WebSocketHandler};
//!
//! struct Chat;
//!
//! impl WebSocketHandler for Chat {
//!     fn on_connected(&mut self, ws: &WebSocket) {
//!         ws.send("hello");
//!     }
//!
//!     fn on_data(&mut self, ws: &WebSocket, data: Data) {
//!         println!("received {data:?}");
//!         ws.close(CloseCode::Normal);
//!     }
//! }
//!
//! let ws = WebSocket::new(Config::client(), Chat)?;
//! ws.connect("ws://127.0.0.1:9001/")?;
//! # Ok::<(), rsws_client::Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod target;
pub mod transport;

pub use config::{Config, Limits, Timeouts};
pub use connection::{Builder, ConnectionState, EventLoop, SentCallback, WebSocket, WebSocketHandler};
pub use error::{Error, ProtocolViolation, Result};
pub use message::{CloseCode, Data, DataKind};
pub use protocol::{Frame, OpCode};
pub use target::{Scheme, Target};
pub use transport::{BoxFuture, BoxedStream, Connector, Stream, TcpConnector};

#[cfg(feature = "tls-rustls")]
pub use transport::{TlsConnector, client_config_with_webpki_roots};
