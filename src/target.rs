//! Connect targets parsed from `ws://` and `wss://` URLs.

use url::{Host, Url};

use crate::error::{Error, Result};

/// Whether the connection runs over plain TCP or TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `ws://`
    Ws,
    /// `wss://`
    Wss,
}

impl Scheme {
    /// Port used when the URL names none.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

/// Where to connect and what to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Transport scheme.
    pub scheme: Scheme,
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request target: path plus optional query, always starting with `/`.
    pub resource: String,
}

impl Target {
    /// Parse a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] when the string is not a URL, the scheme
    /// is not `ws`/`wss`, or no host is given.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;

        let scheme = match url.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::InvalidUrl("missing host".into())),
        };

        let port = url.port().unwrap_or(scheme.default_port());

        let mut resource = url.path().to_owned();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            resource,
        })
    }

    /// Returns `true` for `wss://` targets.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.scheme, Scheme::Wss)
    }

    /// Value of the `Host` request header.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ws_defaults() {
        let target = Target::parse("ws://example.com").unwrap();
        assert_eq!(target.scheme, Scheme::Ws);
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.resource, "/");
        assert!(!target.is_tls());
        assert_eq!(target.host_header(), "example.com");
    }

    #[test]
    fn test_parse_wss_with_port_path_and_query() {
        let target = Target::parse("wss://example.com:8443/chat?room=1").unwrap();
        assert_eq!(target.scheme, Scheme::Wss);
        assert_eq!(target.port, 8443);
        assert_eq!(target.resource, "/chat?room=1");
        assert!(target.is_tls());
        assert_eq!(target.host_header(), "example.com:8443");
    }

    #[test]
    fn test_parse_ipv6_host() {
        let target = Target::parse("ws://[::1]:9001/").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.host_header(), "[::1]:9001");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(matches!(
            Target::parse("http://example.com"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Target::parse("not a url"), Err(Error::InvalidUrl(_))));
        assert!(matches!(Target::parse("ws://"), Err(Error::InvalidUrl(_))));
    }
}
