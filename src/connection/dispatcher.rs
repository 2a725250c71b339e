//! Delivery of connection events to application code.
//!
//! Notifications are queued by the connection task and delivered, in order,
//! by a separate dispatcher task. Handler code therefore never runs inside the
//! connection's serialized context and may call back into the [`WebSocket`]
//! freely.

use std::sync::Weak;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::websocket::{Shared, WebSocket};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Data};

/// Completion callback for a single send.
pub type SentCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Receives connection events.
///
/// Every method has an empty default so implementors only override what they
/// care about. Calls are made one at a time, in the order the events occurred.
///
/// # Example
///
/// ```rust,no_run
/// use rsws_client::{CloseCode, Data, WebSocket, WebSocketHandler};
///
/// struct Echo;
///
/// impl WebSocketHandler for Echo {
///     fn on_connected(&mut self, ws: &WebSocket) {
///         ws.send("hello");
///     }
///
///     fn on_data(&mut self, ws: &WebSocket, data: Data) {
///         ws.send(data);
///     }
///
///     fn on_disconnected(&mut self, _ws: &WebSocket, code: CloseCode) {
///         println!("closed with {code}");
///     }
/// }
/// ```
pub trait WebSocketHandler: Send + 'static {
    /// The opening handshake completed.
    fn on_connected(&mut self, _ws: &WebSocket) {}

    /// The connection is gone. `code` is the locally recorded close code.
    fn on_disconnected(&mut self, _ws: &WebSocket, _code: CloseCode) {}

    /// A complete message arrived.
    fn on_data(&mut self, _ws: &WebSocket, _data: Data) {}

    /// The peer sent a ping. The pong has already been queued.
    fn on_ping(&mut self, _ws: &WebSocket) {}

    /// The peer answered a ping.
    fn on_pong(&mut self, _ws: &WebSocket) {}

    /// Something went wrong. Protocol and transport errors are followed by a
    /// close; errors from invalid calls leave the connection untouched.
    ///
    /// The default logs the error.
    fn on_error(&mut self, _ws: &WebSocket, error: Error) {
        tracing::warn!(%error, "unhandled websocket error");
    }
}

/// Handler that ignores every event apart from logging errors.
impl WebSocketHandler for () {}

pub(crate) enum Notification {
    Connected,
    Disconnected(CloseCode),
    Data(Data),
    Ping,
    Pong,
    Error(Error),
    Sent(SentCallback, Result<()>),
}

/// Sending side of the notification queue.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Dispatcher {
    /// Start the dispatcher task on `handle`.
    ///
    /// `socket` is weak so pending notifications never keep a dropped
    /// `WebSocket` alive. Once it is gone, only send callbacks still run.
    pub(crate) fn spawn(
        handle: &Handle,
        mut handler: Box<dyn WebSocketHandler>,
        socket: Weak<Shared>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.spawn(async move {
            while let Some(notification) = rx.recv().await {
                deliver(handler.as_mut(), &socket, notification);
            }
            tracing::trace!("dispatcher stopped");
        });
        Self { tx }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("dispatcher gone, notification dropped");
        }
    }
}

fn deliver(handler: &mut dyn WebSocketHandler, socket: &Weak<Shared>, notification: Notification) {
    let ws = WebSocket::upgrade(socket);
    match (notification, ws.as_ref()) {
        (Notification::Sent(on_sent, result), _) => on_sent(result),
        (_, None) => {}
        (Notification::Connected, Some(ws)) => handler.on_connected(ws),
        (Notification::Disconnected(code), Some(ws)) => handler.on_disconnected(ws, code),
        (Notification::Data(data), Some(ws)) => handler.on_data(ws, data),
        (Notification::Ping, Some(ws)) => handler.on_ping(ws),
        (Notification::Pong, Some(ws)) => handler.on_pong(ws),
        (Notification::Error(error), Some(ws)) => handler.on_error(ws, error),
    }
}
