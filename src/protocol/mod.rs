//! WebSocket protocol core (RFC 6455): frames, masking, handshake and
//! message reassembly. Nothing in here performs I/O.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::MessageAssembler;
pub use frame::{Frame, FrameHead, encode_frame};
pub use handshake::{
    Handshake, HandshakeOutcome, HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key,
};
pub use mask::{MaskGenerator, apply_mask, apply_mask_fast};
pub use opcode::OpCode;
