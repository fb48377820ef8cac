//! Splitting outgoing messages into frames (RFC 6455 Section 5.4).
//!
//! The first frame carries the message opcode, the rest carry
//! `OpCode::Continuation`, and only the last has `fin` set. An empty message
//! still produces one (final) frame.

use crate::protocol::{Frame, OpCode};

/// Splits a binary payload into frames of at most `fragment_size` bytes.
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    is_first: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Create a new fragmenter for the given payload.
    #[inline]
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.max(1),
            offset: 0,
            is_first: true,
        }
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }
}

impl Iterator for MessageFragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() && !(self.is_first && self.payload.is_empty()) {
            return None;
        }

        let chunk_size = self.remaining().min(self.fragment_size);
        let chunk = self.payload[self.offset..self.offset + chunk_size].to_vec();
        self.offset += chunk_size;

        let opcode = if std::mem::take(&mut self.is_first) {
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(self.remaining() == 0, opcode, chunk))
    }
}

/// Splits text on character boundaries.
///
/// Each fragment holds at most `max_units` characters, counted in UTF-16
/// code units. One unit never encodes to more than three UTF-8 bytes, so
/// with `max_units = max_frame_size / 3` no fragment exceeds
/// `max_frame_size` bytes.
pub struct TextFragmenter<'a> {
    text: &'a str,
    max_units: usize,
    offset: usize,
    is_first: bool,
}

impl<'a> TextFragmenter<'a> {
    #[must_use]
    pub fn new(text: &'a str, max_units: usize) -> Self {
        Self {
            text,
            max_units: max_units.max(1),
            offset: 0,
            is_first: true,
        }
    }

    /// Byte offset where the fragment starting at `self.offset` ends.
    fn fragment_end(&self) -> usize {
        let rest = &self.text[self.offset..];
        let mut units = 0;
        for (idx, ch) in rest.char_indices() {
            units += ch.len_utf16();
            // Always take at least one character so the iterator advances.
            if units > self.max_units && idx > 0 {
                return self.offset + idx;
            }
        }
        self.text.len()
    }
}

impl Iterator for TextFragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.text.len() && !(self.is_first && self.text.is_empty()) {
            return None;
        }

        let end = self.fragment_end();
        let chunk = self.text.as_bytes()[self.offset..end].to_vec();
        self.offset = end;

        let opcode = if std::mem::take(&mut self.is_first) {
            OpCode::Text
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(self.offset >= self.text.len(), opcode, chunk))
    }
}
