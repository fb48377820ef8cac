//! WebSocket frame decoding and encoding (RFC 6455 Section 5.2).
//!
//! Decoding is split so a frame can be assembled from arbitrary read
//! boundaries: [`FrameHead::decode`] looks at the first two bytes and reports
//! how many length-extension and mask bytes follow, and
//! [`FrameHead::payload_len`] reads the extension once it is available.
//! [`Frame::parse`] handles the contiguous case.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::{apply_mask, apply_mask_fast};

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload length encoded inline in the second header byte.
const MAX_INLINE_LEN: usize = 125;

/// Largest payload length encoded with the 16-bit extension.
const MAX_U16_LEN: usize = 0xFFFF;

/// Length marker announcing a 16-bit extended payload length.
const LEN_MARKER_U16: u8 = 126;

/// Length marker announcing a 64-bit extended payload length.
const LEN_MARKER_U64: u8 = 127;

/// Choose the shortest length encoding for a payload.
///
/// Returns the 7-bit marker for the second header byte and the number of
/// extension bytes that follow it.
#[inline]
#[must_use]
pub const fn length_encoding(payload_len: usize) -> (u8, usize) {
    if payload_len <= MAX_INLINE_LEN {
        (payload_len as u8, 0)
    } else if payload_len <= MAX_U16_LEN {
        (LEN_MARKER_U16, 2)
    } else {
        (LEN_MARKER_U64, 8)
    }
}

/// The fixed two-byte part of a frame header.
///
/// ```text
///  0                   1
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-------+-+-------------+
/// |F|R|R|R| opcode|M| Payload len |
/// |I|S|S|S|  (4)  |A|     (7)     |
/// |N|V|V|V|       |S|             |
/// | |1|2|3|       |K|             |
/// +-+-+-+-+-------+-+-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Whether a 4-byte masking key follows the length.
    pub masked: bool,
    /// The 7-bit payload length field (126/127 announce an extension).
    pub length_code: u8,
}

impl FrameHead {
    /// Decode the first two header bytes.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if fewer than 2 bytes are supplied
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        Ok(Self {
            fin: (byte0 & 0x80) != 0,
            rsv1: (byte0 & 0x40) != 0,
            rsv2: (byte0 & 0x20) != 0,
            rsv3: (byte0 & 0x10) != 0,
            opcode: OpCode::from_u8(byte0 & 0x0F)?,
            masked: (byte1 & 0x80) != 0,
            length_code: byte1 & 0x7F,
        })
    }

    /// Number of extended payload length bytes after the first two bytes.
    #[inline]
    #[must_use]
    pub const fn extended_len_size(&self) -> usize {
        match self.length_code {
            LEN_MARKER_U16 => 2,
            LEN_MARKER_U64 => 8,
            _ => 0,
        }
    }

    /// Number of masking key bytes after the length.
    #[inline]
    #[must_use]
    pub const fn mask_size(&self) -> usize {
        if self.masked { 4 } else { 0 }
    }

    /// Total header length including extension and mask.
    #[inline]
    #[must_use]
    pub const fn header_len(&self) -> usize {
        2 + self.extended_len_size() + self.mask_size()
    }

    /// Resolve the payload length from the extended length bytes.
    ///
    /// `ext` must hold exactly [`extended_len_size`](Self::extended_len_size)
    /// bytes.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if fewer extension bytes are supplied
    /// - `Error::InvalidFrame` if the 64-bit length has its top bit set
    pub fn payload_len(&self, ext: &[u8]) -> Result<u64> {
        let needed = self.extended_len_size();
        if ext.len() < needed {
            return Err(Error::IncompleteFrame {
                needed: needed - ext.len(),
            });
        }
        match needed {
            2 => Ok(u64::from(u16::from_be_bytes([ext[0], ext[1]]))),
            8 => {
                let len = u64::from_be_bytes([
                    ext[0], ext[1], ext[2], ext[3], ext[4], ext[5], ext[6], ext[7],
                ]);
                if len >> 63 != 0 {
                    return Err(Error::InvalidFrame(
                        "64-bit payload length has its most significant bit set".into(),
                    ));
                }
                Ok(len)
            }
            _ => Ok(u64::from(self.length_code)),
        }
    }

    #[inline]
    fn first_byte(&self) -> u8 {
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
        byte0
    }
}

/// Encode one frame into `out`.
///
/// Writes the two header bytes, the shortest length extension, the masking
/// key and the payload. When `mask` is set, `payload` is masked in place
/// before being copied; with `preserve_original` it is unmasked again
/// afterwards, otherwise the caller's buffer is left masked.
///
/// The `masked` and `length_code` fields of `head` are ignored; they are
/// derived from `mask` and `payload`.
pub fn encode_frame(
    head: &FrameHead,
    mask: Option<[u8; 4]>,
    payload: &mut [u8],
    preserve_original: bool,
    out: &mut BytesMut,
) {
    let payload_len = payload.len();
    let (length_code, extended_len_size) = length_encoding(payload_len);
    let mask_size = if mask.is_some() { 4 } else { 0 };
    out.reserve(2 + extended_len_size + mask_size + payload_len);

    out.put_u8(head.first_byte());
    out.put_u8(if mask.is_some() {
        length_code | 0x80
    } else {
        length_code
    });

    match extended_len_size {
        2 => out.put_u16(payload_len as u16),
        8 => out.put_u64(payload_len as u64),
        _ => {}
    }

    match mask {
        Some(key) => {
            out.put_slice(&key);
            apply_mask_fast(payload, key);
            out.put_slice(payload);
            if preserve_original {
                apply_mask_fast(payload, key);
            }
        }
        None => out.put_slice(payload),
    }
}

/// A WebSocket frame as defined in RFC 6455.
///
/// Payloads are always held unmasked; `mask` records the key the frame
/// arrived with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1, available to extensions.
    pub rsv1: bool,
    /// Reserved bit 2, available to extensions.
    pub rsv2: bool,
    /// Reserved bit 3, available to extensions.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Masking key the frame was received with.
    pub mask: Option<[u8; 4]>,
    payload: Vec<u8>,
    extension_data: Vec<(String, Vec<u8>)>,
}

impl Frame {
    /// Create a new unmasked frame with clear reserved bits.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
            extension_data: Vec::new(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Create a close frame with a raw payload (code + reason).
    #[must_use]
    pub fn close(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Close, payload)
    }

    /// Build a frame from a decoded head and its unmasked payload.
    #[must_use]
    pub fn from_head(head: &FrameHead, mask: Option<[u8; 4]>, payload: Vec<u8>) -> Self {
        Self {
            fin: head.fin,
            rsv1: head.rsv1,
            rsv2: head.rsv2,
            rsv3: head.rsv3,
            opcode: head.opcode,
            mask,
            payload,
            extension_data: Vec::new(),
        }
    }

    /// The header this frame would be written with.
    #[must_use]
    pub fn head(&self, masked: bool) -> FrameHead {
        FrameHead {
            fin: self.fin,
            rsv1: self.rsv1,
            rsv2: self.rsv2,
            rsv3: self.rsv3,
            opcode: self.opcode,
            masked,
            length_code: length_encoding(self.payload.len()).0,
        }
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Take the payload out, leaving an empty one behind.
    pub fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }

    /// Attach metadata for an extension to this frame.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_extension_data(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        if let Some(slot) = self.extension_data.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = data;
        } else {
            self.extension_data.push((name, data));
        }
    }

    /// Metadata previously attached for an extension.
    #[must_use]
    pub fn extension_data(&self, name: &str) -> Option<&[u8]> {
        self.extension_data
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    /// Parse a frame from a contiguous buffer.
    ///
    /// Returns the parsed frame (payload unmasked) and the number of bytes
    /// consumed.
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::InvalidFrame` if the declared length is not addressable
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let head = FrameHead::decode(buf)?;
        let ext_end = 2 + head.extended_len_size();
        if buf.len() < ext_end {
            return Err(Error::IncompleteFrame {
                needed: ext_end - buf.len(),
            });
        }
        let payload_len = head.payload_len(&buf[2..ext_end])?;
        let payload_len = usize::try_from(payload_len)
            .map_err(|_| Error::InvalidFrame(format!("payload length {payload_len} too large")))?;

        let header_len = head.header_len();
        let total_size = header_len
            .checked_add(payload_len)
            .ok_or_else(|| Error::InvalidFrame("frame length overflows".into()))?;

        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let mask = if head.masked {
            Some([buf[ext_end], buf[ext_end + 1], buf[ext_end + 2], buf[ext_end + 3]])
        } else {
            None
        };

        let mut payload = buf[header_len..total_size].to_vec();
        if let Some(key) = mask {
            apply_mask_fast(&mut payload, key);
        }

        Ok((Self::from_head(&head, mask, payload), total_size))
    }

    /// Validate the frame according to RFC 6455.
    ///
    /// Reserved bits are not checked here; they belong to extensions.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if control frame payload > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }

            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }

        Ok(())
    }

    /// Write the frame to a buffer.
    ///
    /// Returns the number of bytes written. The frame's own payload is left
    /// untouched; masking is applied to the copy in `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFrame` if the buffer is too small.
    pub fn write(&self, buf: &mut [u8], mask: Option<[u8; 4]>) -> Result<usize> {
        let payload_len = self.payload.len();
        let (length_code, extended_len_size) = length_encoding(payload_len);
        let mask_size = if mask.is_some() { 4 } else { 0 };
        let total_size = 2 + extended_len_size + mask_size + payload_len;

        if buf.len() < total_size {
            return Err(Error::InvalidFrame(format!(
                "Buffer too small: need {} bytes, have {}",
                total_size,
                buf.len()
            )));
        }

        buf[0] = self.head(mask.is_some()).first_byte();
        buf[1] = if mask.is_some() {
            length_code | 0x80
        } else {
            length_code
        };

        let mut offset = 2;
        match extended_len_size {
            2 => {
                buf[offset..offset + 2].copy_from_slice(&(payload_len as u16).to_be_bytes());
                offset += 2;
            }
            8 => {
                buf[offset..offset + 8].copy_from_slice(&(payload_len as u64).to_be_bytes());
                offset += 8;
            }
            _ => {}
        }

        if let Some(key) = mask {
            buf[offset..offset + 4].copy_from_slice(&key);
            offset += 4;
        }

        buf[offset..offset + payload_len].copy_from_slice(&self.payload);

        if let Some(key) = mask {
            apply_mask(&mut buf[offset..offset + payload_len], key);
        }

        Ok(total_size)
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = length_encoding(payload_len).1;
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}
