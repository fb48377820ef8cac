//! Reassembly of fragmented messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Frame, OpCode};

/// Reassembles data frames into messages.
///
/// A message starts with a Text or Binary frame and continues with
/// Continuation frames until one has `fin` set. Control frames never pass
/// through here. The running size and frame count are bounded by
/// [`Limits`], so a peer cannot grow the buffer forever with non-final
/// continuations.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    limits: Limits,
    buffer: BytesMut,
    opcode: Option<OpCode>,
    fragments: usize,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Add a data frame to the message being assembled.
    ///
    /// Returns the finished message when `frame.fin` is set.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a Continuation with no message in
    ///   progress, or a new Text/Binary while one is in progress
    /// - `Error::MessageTooLarge` or `Error::TooManyFragments` if the message
    ///   outgrows the limits; the partial message is dropped
    /// - `Error::InvalidUtf8` if a finished text message is not UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Continuation => {
                if self.opcode.is_none() {
                    return Err(Error::ProtocolViolation(
                        "Unexpected continuation frame".into(),
                    ));
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.opcode.is_some() {
                    return Err(Error::ProtocolViolation(
                        "Expected continuation frame".into(),
                    ));
                }
                if frame.fin {
                    self.limits.check_message_size(frame.payload().len())?;
                    return Self::finish(frame.opcode, frame.into_payload()).map(Some);
                }
                self.opcode = Some(frame.opcode);
            }
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "{other} frame is not part of a data message"
                )));
            }
        }

        let checked = self
            .limits
            .check_fragment_count(self.fragments + 1)
            .and_then(|()| {
                self.limits
                    .check_message_size(self.buffer.len() + frame.payload().len())
            });
        if let Err(e) = checked {
            tracing::warn!(
                fragments = self.fragments,
                buffered = self.buffer.len(),
                error = %e,
                "dropping oversized message"
            );
            self.reset();
            return Err(e);
        }

        self.buffer.extend_from_slice(frame.payload());
        self.fragments += 1;

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        let opcode = self.opcode.take().unwrap_or(OpCode::Binary);
        tracing::trace!(%opcode, fragments = self.fragments, len = payload.len(), "message reassembled");
        self.fragments = 0;
        Self::finish(opcode, payload).map(Some)
    }

    fn finish(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
        if opcode == OpCode::Text {
            String::from_utf8(payload)
                .map(Message::Text)
                .map_err(|_| Error::InvalidUtf8)
        } else {
            Ok(Message::Binary(payload))
        }
    }

    /// Whether a fragmented message is in progress.
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Bytes buffered for the message in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message and release its buffer.
    pub fn reset(&mut self) {
        self.buffer = BytesMut::new();
        self.opcode = None;
        self.fragments = 0;
    }
}
