//! Server side of an in-memory WebSocket connection.

use bytes::BytesMut;
use rsws_client::protocol::compute_accept_key;
use rsws_client::{Frame, Limits, OpCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// A minimal WebSocket server speaking the crate's own frame codec.
pub struct Peer {
    io: DuplexStream,
    buf: BytesMut,
    limits: Limits,
    request: String,
}

impl Peer {
    pub(super) async fn accept(mut io: DuplexStream, extra: &[u8]) -> Self {
        let (request, buf) = read_request(&mut io).await;
        let key = header(&request, "sec-websocket-key").expect("missing Sec-WebSocket-Key");

        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(&key)
        )
        .into_bytes();
        response.extend_from_slice(extra);
        io.write_all(&response).await.unwrap();

        Self {
            io,
            buf,
            limits: Limits::default(),
            request,
        }
    }

    pub(super) async fn reject(mut io: DuplexStream, status: u16) {
        let _ = read_request(&mut io).await;
        let response = format!("HTTP/1.1 {status} Nope\r\nContent-Length: 0\r\n\r\n");
        io.write_all(response.as_bytes()).await.unwrap();
    }

    /// The client's upgrade request head.
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Write an unmasked frame.
    pub async fn send(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        frame.write(&mut out);
        self.io.write_all(&out).await.unwrap();
    }

    /// Write bytes as they are.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    /// Read the next frame, or `None` once the client closed the transport.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buf, &self.limits).unwrap() {
                return Some(frame);
            }
            if self.io.read_buf(&mut self.buf).await.unwrap() == 0 {
                return None;
            }
        }
    }

    /// Read the next frame and assert it is a close frame; returns its code.
    pub async fn recv_close_code(&mut self) -> u16 {
        let frame = self.recv().await.expect("transport closed before close frame");
        assert_eq!(frame.opcode, OpCode::Close);
        let payload = frame.unmasked_payload();
        assert_eq!(payload.len(), 2, "close frame body must be exactly the code");
        u16::from_be_bytes([payload[0], payload[1]])
    }

    /// Assert the client closed the transport.
    pub async fn expect_eof(&mut self) {
        if let Some(frame) = self.recv().await {
            panic!("expected end of stream, got {frame:?}");
        }
    }
}

async fn read_request(io: &mut DuplexStream) -> (String, BytesMut) {
    let mut buf = BytesMut::new();
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = buf.split_to(end + 4);
            return (String::from_utf8(head.to_vec()).unwrap(), buf);
        }
        let n = io.read_buf(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before finishing its request");
    }
}

fn header(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_owned())
    })
}
