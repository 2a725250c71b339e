//! Reassembly of fragmented WebSocket messages (RFC 6455 Section 5.4).

use bytes::{Bytes, BytesMut};

use crate::config::Limits;
use crate::error::{Error, ProtocolViolation, Result};
use crate::message::{Data, DataKind};
use crate::protocol::{Frame, OpCode};

/// In-progress data message. At most one exists at a time.
#[derive(Debug)]
struct ReassemblyBuffer {
    message_type: DataKind,
    accumulated: BytesMut,
    fragment_count: usize,
}

impl ReassemblyBuffer {
    fn opcode(&self) -> OpCode {
        match self.message_type {
            DataKind::Text => OpCode::Text,
            DataKind::Binary => OpCode::Binary,
        }
    }
}

/// Outcome of a frame that completed something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A complete text or binary message.
    Data(Data),
    /// A pong arrived; the liveness monitor should be notified.
    Pong(Bytes),
    /// A ping arrived and must be answered with this payload.
    Ping(Bytes),
}

/// Accumulates the fragments of one message into a complete payload.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Option<ReassemblyBuffer>,
    limits: Limits,
}

impl Reassembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: None,
            limits,
        }
    }

    /// Feed one inbound frame.
    ///
    /// Returns `Ok(Some(..))` when the frame finished a message or was a
    /// ping/pong, `Ok(None)` while a fragmented message is still open.
    ///
    /// On any error the buffer is discarded, so the next message starts from
    /// a clean state.
    ///
    /// # Errors
    ///
    /// - [`Error::OpcodeMismatch`] when a text/binary frame arrives mid-message
    /// - [`ProtocolViolation::UnexpectedContinuation`] for a continuation with no message open
    /// - [`ProtocolViolation::FragmentedControlFrame`] for a non-final ping/pong
    /// - [`ProtocolViolation::InvalidUtf8`] when a completed text message is not UTF-8
    /// - size/fragment limit violations
    ///
    /// Close frames are not handled here.
    pub fn append(&mut self, frame: &Frame) -> Result<Option<Assembled>> {
        let result = self.append_inner(frame);
        if result.is_err() {
            self.buffer = None;
        }
        result
    }

    fn append_inner(&mut self, frame: &Frame) -> Result<Option<Assembled>> {
        let kind = match (frame.opcode, &self.buffer) {
            (OpCode::Ping | OpCode::Pong | OpCode::Close, _) => {
                if !frame.fin {
                    return Err(ProtocolViolation::FragmentedControlFrame.into());
                }
                let payload = frame.unmasked_payload();
                return Ok(match frame.opcode {
                    OpCode::Ping => Some(Assembled::Ping(payload)),
                    OpCode::Pong => Some(Assembled::Pong(payload)),
                    _ => None,
                });
            }
            (OpCode::Text, None) => DataKind::Text,
            (OpCode::Binary, None) => DataKind::Binary,
            (OpCode::Text | OpCode::Binary, Some(buffer)) => {
                return Err(Error::OpcodeMismatch {
                    expected: buffer.opcode(),
                    got: frame.opcode,
                });
            }
            (OpCode::Continuation, None) => {
                return Err(ProtocolViolation::UnexpectedContinuation.into());
            }
            (OpCode::Continuation, Some(buffer)) => buffer.message_type,
        };

        let buffer = self.buffer.get_or_insert_with(|| ReassemblyBuffer {
            message_type: kind,
            accumulated: BytesMut::new(),
            fragment_count: 0,
        });

        let payload = frame.unmasked_payload();
        self.limits
            .check_fragment_count(buffer.fragment_count + 1)?;
        self.limits
            .check_message_size(buffer.accumulated.len() + payload.len())?;

        buffer.accumulated.extend_from_slice(&payload);
        buffer.fragment_count += 1;

        if !frame.fin {
            return Ok(None);
        }

        let Some(buffer) = self.buffer.take() else {
            return Ok(None);
        };
        let bytes = buffer.accumulated.freeze();
        let data = match buffer.message_type {
            DataKind::Text => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| ProtocolViolation::InvalidUtf8)?;
                Data::Text(text)
            }
            DataKind::Binary => Data::Binary(bytes),
        };
        Ok(Some(Assembled::Data(data)))
    }

    /// Returns `true` while a fragmented message is open.
    pub fn is_assembling(&self) -> bool {
        self.buffer.is_some()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.buffer = None;
    }
}
