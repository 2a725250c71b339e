//! Byte transports the client runs the WebSocket protocol over.
//!
//! The connection state machine only needs a bidirectional byte stream; how
//! it is established is up to a [`Connector`]. [`TcpConnector`] is the
//! default, with `wss://` support behind the `tls-rustls` feature.

#[cfg(feature = "tls-rustls")]
mod tls;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::target::Target;

#[cfg(feature = "tls-rustls")]
pub use tls::{TlsConnector, client_config_with_webpki_roots};

/// A bidirectional byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream handed from a [`Connector`] to the connection.
pub type BoxedStream = Box<dyn Stream>;

/// Boxed future returned by [`Connector::connect`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opens the raw byte stream for a target.
///
/// The connection applies its connect timeout around the whole call, so
/// implementations don't need their own.
pub trait Connector: Send + Sync + 'static {
    /// Open a stream to `target`, including TLS for `wss://`.
    fn connect<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<BoxedStream>>;
}

/// Plain TCP connector with `TCP_NODELAY`, TLS-wrapped for `wss://` when the
/// `tls-rustls` feature is enabled.
#[derive(Clone)]
pub struct TcpConnector {
    #[cfg(feature = "tls-rustls")]
    tls: TlsConnector,
}

impl TcpConnector {
    /// Create a connector. With `tls-rustls`, TLS trusts the webpki roots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "tls-rustls")]
            tls: TlsConnector::new(client_config_with_webpki_roots()),
        }
    }

    /// Create a connector using a custom TLS client configuration.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(tls: TlsConnector) -> Self {
        Self { tls }
    }

    async fn open(&self, target: &Target) -> Result<BoxedStream> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(host = %target.host, port = target.port, "tcp connected");

        if target.is_tls() {
            #[cfg(feature = "tls-rustls")]
            {
                let stream = self.tls.connect(&target.host, stream).await?;
                return Ok(Box::new(stream));
            }
            #[cfg(not(feature = "tls-rustls"))]
            {
                return Err(crate::Error::Transport(
                    "wss:// requires the tls-rustls feature".into(),
                ));
            }
        }

        Ok(Box::new(stream))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector").finish_non_exhaustive()
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(self.open(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_opens_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let target = Target::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
        let mut stream = TcpConnector::new().connect(&target).await.unwrap();
        stream.write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Target::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
        let result = TcpConnector::new().connect(&target).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[cfg(not(feature = "tls-rustls"))]
    #[tokio::test]
    async fn test_wss_without_tls_feature() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = Target::parse(&format!("wss://127.0.0.1:{port}/")).unwrap();
        let result = TcpConnector::new().connect(&target).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        drop(listener);
    }
}
