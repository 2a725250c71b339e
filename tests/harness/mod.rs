//! Test harness for driving a client against an in-memory peer.
//!
//! The client talks to a [`Peer`] over a `tokio::io::duplex` pipe handed out
//! by [`MockConnector`]; everything the handler sees is recorded by a
//! [`Recorder`].

#![allow(dead_code)]

mod connector;
mod peer;
mod recorder;

pub use connector::{MockConnector, PeerAcceptor, PendingConnector};
pub use peer::Peer;
pub use recorder::{Observations, Observed, Recorder};

use rsws_client::{Config, EventLoop, WebSocket};
use tokio::runtime::Handle;

/// Build a client on the current runtime, connected to a mock peer.
pub fn client(config: Config) -> (WebSocket, PeerAcceptor, Observations) {
    let (connector, acceptor) = MockConnector::new();
    let (recorder, observations) = Recorder::new();
    let ws = WebSocket::builder(recorder)
        .config(config)
        .event_loop(EventLoop::Shared(Handle::current()))
        .connector(connector)
        .build()
        .unwrap();
    (ws, acceptor, observations)
}

/// Build a client and complete the opening handshake.
pub async fn connected(config: Config) -> (WebSocket, Peer, Observations) {
    let (ws, mut acceptor, mut observations) = client(config);
    ws.connect("ws://peer.test/chat").unwrap();
    let peer = acceptor.accept().await;
    assert_eq!(observations.next().await, Observed::Connected);
    (ws, peer, observations)
}
