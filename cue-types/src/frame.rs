//! Delimiter framing for the stream channel.
//!
//! A frame is one compact JSON document followed by [`FRAME_DELIMITER`].
//! Compact JSON escapes control characters inside strings, so the delimiter
//! never appears inside a document.
//!
//! The receiver pushes raw bytes into a [`FrameDecoder`] as they arrive and
//! pulls complete frames out. Partial frames stay buffered until completed.

use crate::{Envelope, WireError};

/// Byte that terminates every frame (`\n`).
pub const FRAME_DELIMITER: u8 = b'\n';

/// Largest frame the decoder will buffer (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode an envelope as one delimited frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let mut bytes = envelope.to_json()?;
    bytes.push(FRAME_DELIMITER);
    Ok(bytes)
}

/// Splits a byte stream into frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
    /// Skipping the rest of an oversized frame, up to its delimiter.
    discarding: bool,
}

impl FrameDecoder {
    /// Create a decoder with the default size limit.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom size limit.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
            discarding: false,
        }
    }

    /// Append received bytes.
    ///
    /// Returns an error if the buffered partial frame exceeded the size
    /// limit. The oversized frame is discarded and decoding resumes at the
    /// next delimiter; complete frames already buffered are kept.
    pub fn push(&mut self, mut bytes: &[u8]) -> Result<(), WireError> {
        if self.discarding {
            match bytes.iter().position(|&b| b == FRAME_DELIMITER) {
                Some(end) => {
                    bytes = &bytes[end + 1..];
                    self.discarding = false;
                }
                None => return Ok(()),
            }
        }
        self.buffer.extend_from_slice(bytes);

        let tail_start = self
            .buffer
            .iter()
            .rposition(|&b| b == FRAME_DELIMITER)
            .map_or(0, |i| i + 1);
        let tail_len = self.buffer.len() - tail_start;
        if tail_len > self.max_frame {
            self.buffer.truncate(tail_start);
            self.discarding = true;
            return Err(WireError::FrameTooLarge {
                size: tail_len,
                limit: self.max_frame,
            });
        }
        Ok(())
    }

    /// Take the next complete frame, without its delimiter.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let end = self.buffer.iter().position(|&b| b == FRAME_DELIMITER)?;
            let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
            frame.pop();
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Bytes currently buffered (complete and partial frames).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
