//! Application messages and close codes as defined in RFC 6455.

/// Maximum length of a close reason: a control payload is capped at 125
/// bytes and two of them carry the status code.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// Invalid payload (1007). E.g., non-UTF-8 data in a text message.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011).
    InternalError,
    /// Any other code (3000-4999 for applications, 1012-1014 registered).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1: 1004, 1005 (no status),
    /// 1006 (abnormal closure) and 1015 (TLS handshake).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }

    /// Check if this code may be put in a Close frame: a defined code from
    /// 1000-1014 that is not reserved, or an application code from 3000-4999.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1014 | 3000..=4999) && !self.is_reserved()
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

/// Status code and reason carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Reason bytes (UTF-8 on the wire, at most 123 bytes).
    pub reason: Vec<u8>,
}

impl CloseFrame {
    /// Create a close frame; the reason is truncated to 123 bytes.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<Vec<u8>>) -> Self {
        let mut reason = reason.into();
        reason.truncate(MAX_CLOSE_REASON);
        Self { code, reason }
    }

    /// Encode as a Close frame payload: big-endian code followed by the reason.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        payload.extend_from_slice(&self.reason);
        payload
    }

    /// Decode a Close frame payload.
    ///
    /// Returns `None` for an empty payload (no status code present) and for
    /// a lone byte, which cannot hold a status code.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        Some(Self::new(CloseCode::from_u16(code), &payload[2..]))
    }

    /// The reason decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn reason_text(&self) -> String {
        String::from_utf8_lossy(&self.reason).into_owned()
    }
}

/// A reassembled application message.
///
/// The variant is decided once, from the opcode of the first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    /// Consume and return the binary content, if this is a binary message.
    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Message::Binary(data) => Some(data),
            Message::Text(_) => None,
        }
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    /// Borrow the binary content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(data) => Some(data),
            Message::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_creation() {
        let msg = Message::text("hello");
        assert!(matches!(msg, Message::Text(ref s) if s == "hello"));
        assert!(msg.is_text());
        assert!(!msg.is_binary());
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn test_message_binary_creation() {
        let msg = Message::binary([4, 5, 6]);
        assert_eq!(msg.as_binary(), Some([4, 5, 6].as_slice()));
        assert_eq!(msg.as_text(), None);
        assert!(Message::binary(Vec::new()).is_empty());
    }

    #[test]
    fn test_message_into() {
        assert_eq!(Message::text("hi").into_text(), Some("hi".to_string()));
        assert_eq!(Message::text("hi").into_binary(), None);
        assert_eq!(Message::binary(vec![1]).into_binary(), Some(vec![1]));
    }

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1001), CloseCode::GoingAway);
        assert_eq!(CloseCode::from_u16(1002), CloseCode::ProtocolError);
        assert_eq!(CloseCode::from_u16(1011), CloseCode::InternalError);
        assert_eq!(CloseCode::from_u16(3000), CloseCode::Other(3000));
        assert_eq!(CloseCode::Other(3500).as_u16(), 3500);
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1005).is_reserved());
        assert!(CloseCode::Other(1006).is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::Other(3000).is_reserved());
    }

    #[test]
    fn test_close_code_sendable() {
        for code in [1000, 1001, 1003, 1007, 1011, 1014, 3000, 4999] {
            assert!(CloseCode::from_u16(code).is_sendable(), "{code}");
        }
        for code in [0, 999, 1004, 1005, 1006, 1015, 1016, 2999, 5000] {
            assert!(!CloseCode::from_u16(code).is_sendable(), "{code}");
        }
    }

    #[test]
    fn test_close_payload_is_big_endian() {
        let frame = CloseFrame::new(CloseCode::Normal, "bye");
        assert_eq!(frame.to_payload(), vec![0x03, 0xe8, b'b', b'y', b'e']);

        let decoded = CloseFrame::from_payload(&[0x03, 0xe9]).unwrap();
        assert_eq!(decoded.code, CloseCode::GoingAway);
        assert!(decoded.reason.is_empty());
    }

    #[test]
    fn test_close_payload_too_short() {
        assert!(CloseFrame::from_payload(&[]).is_none());
        assert!(CloseFrame::from_payload(&[0x03]).is_none());
    }

    #[test]
    fn test_close_reason_truncated() {
        let frame = CloseFrame::new(CloseCode::Normal, vec![b'x'; 300]);
        assert_eq!(frame.reason.len(), MAX_CLOSE_REASON);
        assert_eq!(frame.to_payload().len(), 125);
        assert_eq!(frame.reason_text(), "x".repeat(MAX_CLOSE_REASON));
    }
}
