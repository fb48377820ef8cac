//! Incremental frame capture.
//!
//! Bytes may arrive split at any boundary, so the accumulator walks through
//! the header, the extended length, the masking key and the payload, keeping
//! only what the current stage still needs. A frame is handed out as soon as
//! its last byte arrives and the accumulator resets before reading further.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::mask::apply_mask_fast;
use crate::protocol::{Frame, FrameHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    ExtendedLength,
    Mask,
    Payload,
}

/// Collects the bytes of one frame at a time.
#[derive(Debug)]
pub struct FrameAccumulator {
    limits: Limits,
    stage: Stage,
    scratch: [u8; 8],
    filled: usize,
    head: Option<FrameHead>,
    mask: Option<[u8; 4]>,
    payload: Vec<u8>,
    remaining: usize,
}

impl FrameAccumulator {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            stage: Stage::Header,
            scratch: [0; 8],
            filled: 0,
            head: None,
            mask: None,
            payload: Vec::new(),
            remaining: 0,
        }
    }

    /// True when no partial frame is held.
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Header && self.filled == 0
    }

    /// Payload bytes still expected for the current frame.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Consume bytes until one frame is complete or `data` runs out.
    ///
    /// Returns how many bytes were consumed and the completed frame, if any.
    /// Callers loop on the unconsumed tail to read further frames.
    ///
    /// # Errors
    ///
    /// - `Error::FrameTooLarge` if the declared payload exceeds the limit
    /// - `Error::ControlFrameTooLarge` if a control frame declares more than
    ///   125 bytes
    /// - `Error::InvalidFrame` if the length field is malformed
    pub fn push(&mut self, data: &[u8]) -> Result<(usize, Option<Frame>)> {
        let mut consumed = 0;

        loop {
            match self.stage {
                Stage::Header => {
                    if !self.fill(data, &mut consumed, 2) {
                        return Ok((consumed, None));
                    }
                    let head = FrameHead::decode(&self.scratch[..2])?;
                    self.head = Some(head);
                    self.filled = 0;
                    if head.extended_len_size() > 0 {
                        self.stage = Stage::ExtendedLength;
                    } else {
                        self.set_length(u64::from(head.length_code))?;
                    }
                }
                Stage::ExtendedLength => {
                    let Some(head) = self.head else {
                        self.reset();
                        continue;
                    };
                    if !self.fill(data, &mut consumed, head.extended_len_size()) {
                        return Ok((consumed, None));
                    }
                    let len = head.payload_len(&self.scratch[..head.extended_len_size()])?;
                    self.filled = 0;
                    self.set_length(len)?;
                }
                Stage::Mask => {
                    if !self.fill(data, &mut consumed, 4) {
                        return Ok((consumed, None));
                    }
                    self.mask = Some([
                        self.scratch[0],
                        self.scratch[1],
                        self.scratch[2],
                        self.scratch[3],
                    ]);
                    self.filled = 0;
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    let take = self.remaining.min(data.len() - consumed);
                    self.payload
                        .extend_from_slice(&data[consumed..consumed + take]);
                    consumed += take;
                    self.remaining -= take;
                    if self.remaining > 0 {
                        return Ok((consumed, None));
                    }
                    return Ok((consumed, self.finish()));
                }
            }
        }
    }

    /// Copy bytes into the scratch area until it holds `want` bytes.
    fn fill(&mut self, data: &[u8], consumed: &mut usize, want: usize) -> bool {
        let take = (want - self.filled).min(data.len() - *consumed);
        self.scratch[self.filled..self.filled + take]
            .copy_from_slice(&data[*consumed..*consumed + take]);
        self.filled += take;
        *consumed += take;
        self.filled == want
    }

    fn set_length(&mut self, len: u64) -> Result<()> {
        // Control frames have their own fixed cap, independent of max_frame_size.
        let checked = if self.head.is_some_and(|h| h.opcode.is_control()) {
            if len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                Err(Error::ControlFrameTooLarge(
                    usize::try_from(len).unwrap_or(usize::MAX),
                ))
            } else {
                Ok(())
            }
        } else {
            self.limits.check_frame_size(len)
        };
        if let Err(e) = checked {
            tracing::warn!(len, max = self.limits.max_frame_size, error = %e, "rejecting oversized frame");
            self.reset();
            return Err(e);
        }
        // Fits in usize: bounded by max_frame_size or the control cap.
        self.remaining = len as usize;
        self.payload = Vec::with_capacity(self.remaining);
        let masked = self.head.is_some_and(|h| h.masked);
        self.stage = if masked { Stage::Mask } else { Stage::Payload };
        Ok(())
    }

    fn finish(&mut self) -> Option<Frame> {
        let head = self.head.take()?;
        let mask = self.mask.take();
        let mut payload = std::mem::take(&mut self.payload);
        if let Some(key) = mask {
            apply_mask_fast(&mut payload, key);
        }
        self.stage = Stage::Header;
        self.filled = 0;
        Some(Frame::from_head(&head, mask, payload))
    }

    /// Discard any partial frame and release its buffer.
    pub fn reset(&mut self) {
        self.stage = Stage::Header;
        self.filled = 0;
        self.head = None;
        self.mask = None;
        self.payload = Vec::new();
        self.remaining = 0;
    }
}
