//! Close handshake helpers (RFC 6455 Section 7).

use crate::message::CloseCode;
use crate::protocol::Frame;

/// Close frame announcing `code` to the peer.
///
/// Codes that may not appear on the wire (reserved or unassigned) are sent
/// as 1000. The caller keeps `code` itself for the local `disconnected` report.
/// Masking happens on the write path like for every other outgoing frame.
pub(crate) fn close_frame(code: CloseCode) -> Frame {
    Frame::close(Some(code.wire_code()))
}

/// Status code carried by a peer's close frame.
///
/// An empty or truncated body, or a code that may not be sent, maps to 1005
/// (no status received). Any reason text after the code is ignored.
pub(crate) fn peer_close_code(frame: &Frame) -> CloseCode {
    let payload = frame.unmasked_payload();
    let code = match payload.get(..2) {
        Some(&[hi, lo]) => CloseCode::from_u16(u16::from_be_bytes([hi, lo])),
        _ => return CloseCode::NoStatus,
    };
    if code.is_valid_on_wire() {
        code
    } else {
        tracing::debug!(%code, "peer sent a close code not allowed on the wire");
        CloseCode::NoStatus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::OpCode;
    use bytes::BytesMut;

    #[test]
    fn test_reserved_codes_sent_as_normal() {
        let frame = close_frame(CloseCode::Abnormal);
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.payload(), &[0x03, 0xE8]);

        let frame = close_frame(CloseCode::NoStatus);
        assert_eq!(frame.payload(), &[0x03, 0xE8]);
    }

    #[test]
    fn test_regular_code_kept() {
        let frame = Frame::close(Some(CloseCode::GoingAway));
        assert_eq!(peer_close_code(&frame), CloseCode::GoingAway);
    }

    #[test]
    fn test_peer_code_with_reason() {
        let frame = Frame::new(true, OpCode::Close, &b"\x03\xf3bye"[..]);
        assert_eq!(peer_close_code(&frame), CloseCode::InternalError);
    }

    #[test]
    fn test_peer_code_missing_or_truncated() {
        let empty = Frame::close(None);
        assert_eq!(peer_close_code(&empty), CloseCode::NoStatus);

        let truncated = Frame::new(true, OpCode::Close, vec![0x03u8]);
        assert_eq!(peer_close_code(&truncated), CloseCode::NoStatus);
    }

    #[test]
    fn test_peer_code_not_allowed_on_wire() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 1016, 2999, 5000] {
            let frame = Frame::new(true, OpCode::Close, code.to_be_bytes().to_vec());
            assert_eq!(peer_close_code(&frame), CloseCode::NoStatus, "{code}");
        }
    }

    #[test]
    fn test_unassigned_local_code_sent_as_normal() {
        let frame = close_frame(CloseCode::Other(999));
        assert_eq!(frame.payload(), &[0x03, 0xE8]);

        let frame = close_frame(CloseCode::Other(4000));
        assert_eq!(frame.payload(), &[0x0F, 0xA0]);
    }

    #[test]
    fn test_masked_peer_close_unmasked() {
        let mut wire = BytesMut::new();
        close_frame(CloseCode::PolicyViolation)
            .with_mask([0xAA, 0x55, 0x0F, 0xF0])
            .write(&mut wire);

        let frame = Frame::parse(&mut wire, &Limits::default()).unwrap().unwrap();
        assert!(frame.mask_key.is_some());
        assert_eq!(peer_close_code(&frame), CloseCode::PolicyViolation);
    }
}
