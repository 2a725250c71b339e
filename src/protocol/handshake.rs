//! Client side of the WebSocket opening handshake (RFC 6455 Section 4).
//!
//! Builds the HTTP Upgrade request, reads the server's response head and
//! verifies `Sec-WebSocket-Accept`. Any bytes the server sent after the
//! response head are handed back so the frame decoder sees them.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::target::Target;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers the client always sets itself.
const RESERVED_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use rsws_client::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh random `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the OS random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Transport(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
        return Err(Error::InvalidHandshake(format!(
            "header {name:?} contains CR/LF, or a colon in its name"
        )));
    }
    Ok(())
}

/// The client's HTTP Upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Value of the `Host` header.
    pub host: String,
    /// Request target (path and query).
    pub resource: String,
    /// The Sec-WebSocket-Key sent to the server.
    pub key: String,
    /// Extra headers supplied by the caller.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Build a request for `target` with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if a caller header contains CR/LF,
    /// or an error if no random key can be generated.
    pub fn new(target: &Target, headers: Vec<(String, String)>) -> Result<Self> {
        for (name, value) in &headers {
            validate_header_value(name, value)?;
        }
        Ok(Self {
            host: target.host_header(),
            resource: target.resource.clone(),
            key: generate_key()?,
            headers,
        })
    }

    /// Write the HTTP request to a buffer.
    ///
    /// Caller headers that collide with the handshake's own headers are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if a caller header contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.resource).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");

        for (name, value) in &self.headers {
            validate_header_value(name, value)?;
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// The server's response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Parse a response head (status line and headers, up to the blank line).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the data is not UTF-8 or the
    /// status line is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        // "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {status_line}"
            )));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| Error::InvalidHandshake(format!("Invalid status line: {status_line}")))?;

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self { status, headers })
    }

    /// Check that the response accepts the upgrade requested with `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandshakeResponse`] if the status is not 101
    /// - [`Error::InvalidHandshake`] if `Upgrade`, `Connection` or
    ///   `Sec-WebSocket-Accept` are missing or wrong
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::InvalidHandshakeResponse {
                status: self.status,
            });
        }

        let upgrade = self
            .headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = self.headers.get("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = self
            .headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
        if *accept != compute_accept_key(key) {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match the request key".into(),
            ));
        }

        Ok(())
    }
}

/// Position just past the `\r\n\r\n` ending an HTTP head.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Perform the opening handshake over `io`.
///
/// Returns the bytes received after the response head; they belong to the
/// first WebSocket frames.
///
/// # Errors
///
/// Transport failures, a response head larger than
/// `limits.max_handshake_size`, a non-101 status or a bad accept key.
pub async fn negotiate<S>(io: &mut S, request: &HandshakeRequest, limits: &Limits) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(256);
    request.write(&mut out)?;
    io.write_all(&out).await?;
    io.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = head_end(&buf) {
            let head = buf.split_to(end);
            let response = HandshakeResponse::parse(&head)?;
            response.validate(&request.key)?;
            tracing::debug!(status = response.status, "websocket upgrade accepted");
            return Ok(buf);
        }
        if buf.len() > limits.max_handshake_size {
            return Err(Error::InvalidHandshake(format!(
                "Handshake too large: more than {} bytes",
                limits.max_handshake_size
            )));
        }
        if io.read_buf(&mut buf).await? == 0 {
            return Err(Error::Transport(
                "connection closed during handshake".into(),
            ));
        }
    }
}
