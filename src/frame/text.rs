//! Tag-delimited text splitting.

use super::{find_subslice, Frame, Split, EVENT_DELIMITER};
use crate::error::FrameError;
use bytes::BytesMut;
use tracing::{debug, warn};

/// Splits an append-only text stream on `</event>`.
#[derive(Debug)]
pub struct TextSplitter {
    buffer: BytesMut,
    /// Everything before this offset is known not to start a delimiter
    scan_from: usize,
    max_buffer_bytes: usize,
}

impl TextSplitter {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scan_from: 0,
            max_buffer_bytes,
        }
    }

    /// Append a delivery and return every frame it completes.
    pub fn push(&mut self, data: &[u8]) -> Split {
        self.buffer.extend_from_slice(data);
        let mut split = Split::default();

        while let Some(pos) = find_subslice(&self.buffer, EVENT_DELIMITER, self.scan_from) {
            let frame = self.buffer.split_to(pos + EVENT_DELIMITER.len()).freeze();
            self.scan_from = 0;
            if frame[..pos].iter().all(|b| b.is_ascii_whitespace()) {
                debug!(len = frame.len(), "Skipping empty text frame");
                continue;
            }
            split.frames.push(Frame::Text(frame));
        }
        self.scan_from = self.buffer.len().saturating_sub(EVENT_DELIMITER.len() - 1);

        if self.buffer.len() > self.max_buffer_bytes {
            let err = FrameError::BufferOverflow {
                limit: self.max_buffer_bytes,
                discarded: self.buffer.len(),
            };
            warn!(error = %err, "Discarding unterminated text frame");
            self.buffer.clear();
            self.scan_from = 0;
            split.dropped.push(err);
        }

        split
    }

    /// Trailing partial frame retained for the next call
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any retained partial frame, e.g. after the stream reconnects
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }
}
