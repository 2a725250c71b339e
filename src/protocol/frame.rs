//! WebSocket frame parsing and serialization (RFC 6455 Section 5.2).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::Limits;
use crate::error::ProtocolViolation;
use crate::message::CloseCode;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

#[derive(Debug, Clone)]
struct FrameHeader {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
    header_len: usize,
}

/// Parse a frame header, returning `Ok(None)` while bytes are missing.
fn parse_header(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolViolation> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = (byte0 & 0x80) != 0;
    let rsv1 = (byte0 & 0x40) != 0;
    let rsv2 = (byte0 & 0x20) != 0;
    let rsv3 = (byte0 & 0x10) != 0;
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;

    let masked = (byte1 & 0x80) != 0;
    let (payload_len, len_size) = match byte1 & 0x7F {
        len @ 0..=125 => (len as usize, 2),
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        _ => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let len = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            let len = usize::try_from(len).map_err(|_| ProtocolViolation::FrameTooLarge {
                size: usize::MAX,
                max: usize::MAX,
            })?;
            (len, 10)
        }
    };

    let header_len = if masked { len_size + 4 } else { len_size };
    if buf.len() < header_len {
        return Ok(None);
    }

    let mask = masked.then(|| {
        [
            buf[len_size],
            buf[len_size + 1],
            buf[len_size + 2],
            buf[len_size + 3],
        ]
    });

    Ok(Some(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload_len,
        header_len,
    }))
}

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// The payload is stored as it appeared on the wire. For a frame carrying a
/// `mask_key`, use [`Frame::unmasked_payload`] to read the application bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1. Must be 0 unless an extension is negotiated.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on masked frames.
    pub mask_key: Option<[u8; 4]>,
    payload: Bytes,
}

impl Frame {
    /// Create an unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Close frame whose body is the 2-byte big-endian `code`, or empty.
    #[must_use]
    pub fn close(code: Option<CloseCode>) -> Self {
        let payload = match code {
            Some(code) => Bytes::copy_from_slice(&code.as_u16().to_be_bytes()),
            None => Bytes::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Attach a masking key; the payload is masked when the frame is written.
    #[must_use]
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Payload bytes as carried on the wire.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload with the masking key removed, if any.
    #[must_use]
    pub fn unmasked_payload(&self) -> Bytes {
        match self.mask_key {
            Some(key) => {
                let mut data = self.payload.to_vec();
                apply_mask(&mut data, key);
                Bytes::from(data)
            }
            None => self.payload.clone(),
        }
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
    /// buffer is left untouched in that case. Masked frames keep their key and
    /// masked payload.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::ReservedOpcode`] for reserved opcodes
    /// - [`ProtocolViolation::FrameTooLarge`] if the payload exceeds `limits.max_frame_size`
    pub fn parse(buf: &mut BytesMut, limits: &Limits) -> Result<Option<Self>, ProtocolViolation> {
        let Some(header) = parse_header(buf)? else {
            return Ok(None);
        };
        limits.check_frame_size(header.payload_len)?;

        let total = header.header_len + header.payload_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(header.header_len);
        let payload = buf.split_to(header.payload_len).freeze();

        Ok(Some(Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            mask_key: header.mask,
            payload,
        }))
    }

    /// Validate the frame according to RFC 6455.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::ReservedBitsSet`] if RSV bits are set
    /// - [`ProtocolViolation::FragmentedControlFrame`] if a control frame has FIN=0
    /// - [`ProtocolViolation::ControlFrameTooLarge`] if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<(), ProtocolViolation> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(ProtocolViolation::ReservedBitsSet);
        }

        if self.opcode.is_control() {
            if !self.fin {
                return Err(ProtocolViolation::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(ProtocolViolation::ControlFrameTooLarge(self.payload.len()));
            }
        }

        Ok(())
    }

    /// Append the wire encoding of this frame to `buf`, masking the payload
    /// with `mask_key` when present.
    pub fn write(&self, buf: &mut BytesMut) {
        let payload_len = self.payload.len();
        buf.reserve(self.wire_size());

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.put_u8(byte0);

        let mask_bit = if self.mask_key.is_some() { 0x80 } else { 0 };
        if payload_len <= 125 {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(payload_len as u64);
        }

        match self.mask_key {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], key);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Number of bytes [`Frame::write`] produces.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if self.mask_key.is_some() { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Option<Frame>, ProtocolViolation> {
        let mut buf = BytesMut::from(data);
        Frame::parse(&mut buf, &Limits::default())
    }

    #[test]
    fn test_parse_unmasked_text_frame() {
        // FIN=1, opcode=1 (text), unmasked, payload="Hello"
        let frame = parse(&[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f])
            .unwrap()
            .unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.mask_key, None);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame_keeps_key() {
        // RFC 6455 Section 5.7 masked "Hello"
        let data = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frame = parse(&data).unwrap().unwrap();
        assert_eq!(frame.mask_key, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload(), &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
        assert_eq!(&frame.unmasked_payload()[..], b"Hello");
    }

    #[test]
    fn test_parse_incomplete_leaves_buffer() {
        let mut buf = BytesMut::from(&[0x81, 0x05, 0x48][..]);
        assert_eq!(Frame::parse(&mut buf, &Limits::default()), Ok(None));
        assert_eq!(buf.len(), 3);

        let mut buf = BytesMut::from(&[0x82][..]);
        assert_eq!(Frame::parse(&mut buf, &Limits::default()), Ok(None));
    }

    #[test]
    fn test_parse_16bit_length() {
        let mut data = vec![0x82u8, 126, 0x01, 0x00];
        data.extend(std::iter::repeat_n(0xAB, 256));
        let frame = parse(&data).unwrap().unwrap();
        assert_eq!(frame.payload().len(), 256);
    }

    #[test]
    fn test_parse_consumes_one_frame_at_a_time() {
        let mut buf = BytesMut::from(&[0x89, 0x00, 0x8a, 0x01, 0x07][..]);
        let limits = Limits::default();
        let first = Frame::parse(&mut buf, &limits).unwrap().unwrap();
        assert_eq!(first.opcode, OpCode::Ping);
        let second = Frame::parse(&mut buf, &limits).unwrap().unwrap();
        assert_eq!(second.opcode, OpCode::Pong);
        assert_eq!(second.payload(), &[0x07]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert_eq!(
            parse(&[0x83, 0x00]),
            Err(ProtocolViolation::ReservedOpcode(0x3))
        );
    }

    #[test]
    fn test_parse_frame_too_large() {
        let mut buf = BytesMut::from(&[0x82, 126, 0x10, 0x00][..]);
        let limits = Limits::new(1024, 4096, 4, 4096);
        assert!(matches!(
            Frame::parse(&mut buf, &limits),
            Err(ProtocolViolation::FrameTooLarge { size: 4096, max: 1024 })
        ));
    }

    #[test]
    fn test_write_masked_frame() {
        let frame = Frame::text("Hello").with_mask([0x37, 0xfa, 0x21, 0x3d]);
        let mut buf = BytesMut::new();
        frame.write(&mut buf);
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
        assert_eq!(buf.len(), frame.wire_size());
    }

    #[test]
    fn test_write_close_frame_body() {
        let mut buf = BytesMut::new();
        Frame::close(Some(CloseCode::Normal)).write(&mut buf);
        assert_eq!(&buf[..], &[0x88, 0x02, 0x03, 0xe8]);
    }

    #[test]
    fn test_write_64bit_length_header() {
        let frame = Frame::binary(vec![0u8; 70_000]);
        let mut buf = BytesMut::new();
        frame.write(&mut buf);
        assert_eq!(buf[1], 127);
        assert_eq!(buf.len(), 10 + 70_000);
    }

    #[test]
    fn test_validate_fragmented_control_frame() {
        let frame = Frame::new(false, OpCode::Ping, Bytes::new());
        assert_eq!(
            frame.validate(),
            Err(ProtocolViolation::FragmentedControlFrame)
        );
    }

    #[test]
    fn test_validate_control_frame_too_large() {
        let frame = Frame::ping(vec![0u8; 126]);
        assert_eq!(
            frame.validate(),
            Err(ProtocolViolation::ControlFrameTooLarge(126))
        );
    }

    #[test]
    fn test_validate_reserved_bits() {
        let mut frame = Frame::text("x");
        frame.rsv2 = true;
        assert_eq!(frame.validate(), Err(ProtocolViolation::ReservedBitsSet));
    }

    #[test]
    fn test_validate_fragmented_data_frame_ok() {
        assert!(Frame::new(false, OpCode::Text, "par").validate().is_ok());
    }
}
