//! The application-facing client handle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::dispatcher::{Dispatcher, WebSocketHandler};
use super::machine::{Command, Machine};
use super::state::ConnectionState;
use crate::config::Config;
use crate::error::Result;
use crate::message::{CloseCode, Data};
use crate::target::Target;
use crate::transport::{Connector, TcpConnector};

/// Where the connection task runs.
#[derive(Debug, Clone, Default)]
pub enum EventLoop {
    /// Start a dedicated single-worker runtime owned by the client. It is shut
    /// down when the last [`WebSocket`] handle is dropped.
    #[default]
    CreateNew,
    /// Spawn onto an existing runtime.
    Shared(Handle),
}

/// State shared by all clones of a [`WebSocket`].
pub(crate) struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    actor: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
    shutdown_grace: Duration,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);

        let Some(runtime) = self.runtime.take() else {
            return;
        };
        // Blocking is not allowed inside an async context, e.g. when the last
        // handle is dropped from a handler callback.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
            return;
        }
        if let Some(actor) = self.actor.take() {
            match runtime.block_on(tokio::time::timeout(self.shutdown_grace, actor)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::error!(%error, "connection task failed during shutdown"),
                Err(_) => tracing::warn!("connection task did not stop in time"),
            }
        }
        runtime.shutdown_timeout(self.shutdown_grace);
    }
}

/// Builder for a [`WebSocket`].
pub struct Builder {
    config: Config,
    event_loop: EventLoop,
    callback_handle: Option<Handle>,
    connector: Arc<dyn Connector>,
    handler: Box<dyn WebSocketHandler>,
}

impl Builder {
    fn new(handler: impl WebSocketHandler) -> Self {
        Self {
            config: Config::default(),
            event_loop: EventLoop::default(),
            callback_handle: None,
            connector: Arc::new(TcpConnector::new()),
            handler: Box::new(handler),
        }
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn event_loop(mut self, event_loop: EventLoop) -> Self {
        self.event_loop = event_loop;
        self
    }

    /// Run handler callbacks on this runtime instead of the connection's.
    #[must_use]
    pub fn callback_handle(mut self, handle: Handle) -> Self {
        self.callback_handle = Some(handle);
        self
    }

    /// Replace the default [`TcpConnector`].
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Start the connection task. The client is `Disconnected` until
    /// [`WebSocket::connect`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if a dedicated
    /// runtime was requested and could not be started.
    pub fn build(self) -> Result<WebSocket> {
        let (runtime, handle) = match self.event_loop {
            EventLoop::CreateNew => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("rsws-client")
                    .enable_all()
                    .build()?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
            EventLoop::Shared(handle) => (None, handle),
        };
        let callback_handle = self.callback_handle.unwrap_or_else(|| handle.clone());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown_grace = self.config.timeouts.close;
        let (config, connector, handler) = (self.config, self.connector, self.handler);

        let shared = Arc::new_cyclic(|socket| {
            let dispatcher = Dispatcher::spawn(&callback_handle, handler, socket.clone());
            let machine = Machine::new(config, connector, command_rx, state_tx, dispatcher);
            let actor = handle.spawn(machine.run());
            Shared {
                commands,
                state: state_rx,
                actor: Some(actor),
                runtime,
                shutdown_grace,
            }
        });

        Ok(WebSocket { shared })
    }
}

/// A WebSocket client connection.
///
/// `WebSocket` is a cheap handle; clones drive the same connection. All
/// methods return immediately. Outcomes are delivered to the
/// [`WebSocketHandler`] the client was built with. Dropping the last handle
/// closes an open connection with 1001 (going away) and stops the connection
/// task.
///
/// # Example
///
/// ```rust,no_run
/// use rsws_client::{Config, Data, WebSocket, WebSocketHandler};
/// use std::time::Duration;
///
/// struct Printer;
///
/// impl WebSocketHandler for Printer {
///     fn on_data(&mut self, _ws: &WebSocket, data: Data) {
///         println!("{data:?}");
///     }
/// }
///
/// let config = Config::client().with_ping_interval(Duration::from_secs(30));
/// let ws = WebSocket::new(config, Printer)?;
/// ws.connect("ws://127.0.0.1:9001/chat")?;
/// ws.send("hello");
/// # Ok::<(), rsws_client::Error>(())
/// ```
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl WebSocket {
    /// Create a client on a dedicated runtime.
    ///
    /// # Errors
    ///
    /// See [`Builder::build`].
    pub fn new(config: Config, handler: impl WebSocketHandler) -> Result<Self> {
        Self::builder(handler).config(config).build()
    }

    pub fn builder(handler: impl WebSocketHandler) -> Builder {
        Builder::new(handler)
    }

    pub(crate) fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    /// Connect to a `ws://` or `wss://` URL using the configured connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// Only a malformed URL fails here. Every other outcome, including
    /// [`Error::AlreadyConnected`](crate::Error::AlreadyConnected), is
    /// delivered to the handler.
    pub fn connect(&self, url: &str) -> Result<()> {
        self.connect_with(url, Vec::new(), None)
    }

    /// Connect with extra upgrade request headers and an optional timeout
    /// covering TCP connect, TLS and the upgrade.
    ///
    /// # Errors
    ///
    /// See [`WebSocket::connect`].
    pub fn connect_with(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let target = Target::parse(url)?;
        self.command(Command::Connect {
            target,
            headers,
            timeout,
        });
        Ok(())
    }

    /// Send a text or binary message as a single frame.
    pub fn send(&self, data: impl Into<Data>) {
        self.command(Command::Send {
            data: data.into(),
            on_sent: None,
        });
    }

    /// Send a message and learn when it was written, or why it wasn't.
    pub fn send_with_callback<F>(&self, data: impl Into<Data>, on_sent: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.command(Command::Send {
            data: data.into(),
            on_sent: Some(Box::new(on_sent)),
        });
    }

    pub fn ping(&self) {
        self.command(Command::Ping);
    }

    /// Start the close handshake with `code`. Does nothing if a close is
    /// already in progress or there is no connection.
    pub fn close(&self, code: CloseCode) {
        self.command(Command::Close(code));
    }

    /// Close with 1000 (normal closure).
    pub fn disconnect(&self) {
        self.close(CloseCode::Normal);
    }

    /// Change the keepalive interval. `None` stops pinging.
    pub fn set_ping_interval(&self, interval: Option<Duration>) {
        self.command(Command::SetPingInterval(interval));
    }

    /// The most recent connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn command(&self, command: Command) {
        if self.shared.commands.send(command).is_err() {
            tracing::warn!("connection task has stopped, command dropped");
        }
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
