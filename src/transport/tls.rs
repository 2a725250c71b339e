use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::ClientConfig;

use crate::error::{Error, Result};

/// Client configuration trusting the bundled webpki root certificates.
#[must_use]
pub fn client_config_with_webpki_roots() -> Arc<ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Wraps a connected stream in a TLS client session.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    pub async fn connect<S>(&self, domain: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| Error::InvalidUrl(format!("invalid DNS name: {domain}")))?;

        let tls_stream = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Transport(format!("TLS handshake failed: {e}")))?;

        tracing::debug!(domain, "tls session established");
        Ok(tls_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_has_roots() {
        let config = client_config_with_webpki_roots();
        assert!(config.alpn_protocols.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_dns_name() {
        let connector = TlsConnector::new(client_config_with_webpki_roots());
        let (client, _server) = tokio::io::duplex(64);
        let result = connector.connect("not a valid name!", client).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
