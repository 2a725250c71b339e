//! Connectors that hand the server side of the transport to the test.

use rsws_client::{BoxFuture, BoxedStream, Connector, Error, Result, Target};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::peer::Peer;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Opens an in-memory pipe per connect call.
pub struct MockConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
}

impl MockConnector {
    pub fn new() -> (Self, PeerAcceptor) {
        let (streams, rx) = mpsc::unbounded_channel();
        (Self { streams }, PeerAcceptor { rx })
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, _target: &'a Target) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            self.streams
                .send(server)
                .map_err(|_| Error::Transport("no peer listening".into()))?;
            Ok(Box::new(client) as BoxedStream)
        })
    }
}

/// The server ends of pipes opened by a [`MockConnector`].
pub struct PeerAcceptor {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl PeerAcceptor {
    /// Wait for the client and accept its upgrade.
    pub async fn accept(&mut self) -> Peer {
        Peer::accept(self.next_stream().await, &[]).await
    }

    /// Accept the upgrade and append `extra` to the 101 response.
    pub async fn accept_with(&mut self, extra: &[u8]) -> Peer {
        Peer::accept(self.next_stream().await, extra).await
    }

    /// Answer the upgrade with `status` instead of 101.
    pub async fn reject(&mut self, status: u16) {
        Peer::reject(self.next_stream().await, status).await;
    }

    /// Assert the client has not opened another transport.
    pub fn assert_idle(&mut self) {
        assert!(self.rx.try_recv().is_err(), "client opened an unexpected transport");
    }

    async fn next_stream(&mut self) -> DuplexStream {
        self.rx.recv().await.expect("client never connected")
    }
}

/// A connector whose connect never completes.
pub struct PendingConnector;

impl Connector for PendingConnector {
    fn connect<'a>(&'a self, _target: &'a Target) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(std::future::pending())
    }
}
