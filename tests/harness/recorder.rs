//! A handler that records every event for later assertions.

use std::time::Duration;

use rsws_client::{CloseCode, Data, Error, WebSocket, WebSocketHandler};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connected,
    Disconnected(CloseCode),
    Data(Data),
    Ping,
    Pong,
    Error(Error),
}

pub struct Recorder {
    tx: mpsc::UnboundedSender<Observed>,
}

impl Recorder {
    pub fn new() -> (Self, Observations) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Observations { rx })
    }

    fn record(&self, observed: Observed) {
        let _ = self.tx.send(observed);
    }
}

impl WebSocketHandler for Recorder {
    fn on_connected(&mut self, _ws: &WebSocket) {
        self.record(Observed::Connected);
    }

    fn on_disconnected(&mut self, _ws: &WebSocket, code: CloseCode) {
        self.record(Observed::Disconnected(code));
    }

    fn on_data(&mut self, _ws: &WebSocket, data: Data) {
        self.record(Observed::Data(data));
    }

    fn on_ping(&mut self, _ws: &WebSocket) {
        self.record(Observed::Ping);
    }

    fn on_pong(&mut self, _ws: &WebSocket) {
        self.record(Observed::Pong);
    }

    fn on_error(&mut self, _ws: &WebSocket, error: Error) {
        self.record(Observed::Error(error));
    }
}

pub struct Observations {
    rx: mpsc::UnboundedReceiver<Observed>,
}

impl Observations {
    pub async fn next(&mut self) -> Observed {
        tokio::time::timeout(Duration::from_secs(60), self.rx.recv())
            .await
            .expect("timed out waiting for a handler event")
            .expect("handler dropped")
    }

    /// Assert nothing else is delivered for a short while.
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(observed)) =
            tokio::time::timeout(Duration::from_millis(200), self.rx.recv()).await
        {
            panic!("unexpected event: {observed:?}");
        }
    }
}
