//! Error types for the WebSocket protocol engine.
//!
//! Structural errors (malformed frames, handshake mismatches, unclaimed
//! opcodes) are returned to the caller of `add`, `send` or `close`. Listener
//! failures never surface here; the processor logs them instead.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame payload exceeds the configured maximum frame size.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual payload size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// A fragmented message grew past the configured maximum message size.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Bytes the message would hold.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A message was split into more frames than allowed.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Frames the message would span.
        count: usize,
        /// Maximum allowed count.
        max: usize,
    },

    /// Connection is not open for the requested operation.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake data exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A header value that would be emitted contains CR or LF.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An extension failed to transform a payload.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked frame received from a client.
    #[error("Client frame must be masked")]
    MissingMask,

    /// Masked frame received from a server.
    #[error("Server frame must not be masked")]
    UnexpectedMask,

    /// I/O error reported by a transport.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}
