//! WebSocket protocol core (RFC 6455): frames, masking, reassembly and the
//! client side of the opening handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod reassembler;

pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{MaskKeyGenerator, apply_mask};
pub use opcode::OpCode;
pub use reassembler::{Assembled, Reassembler};
