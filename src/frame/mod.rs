//! Wire Frames
//!
//! Turns raw transport deliveries into complete, self-delimited message frames. Text (XML) and
//! binary (TAK protocol) deliveries are split by independent strategies; a partial text frame is
//! retained until the next delivery completes it.

pub mod binary;
pub mod text;

pub use binary::split_binary;
pub use text::TextSplitter;

use crate::error::FrameError;
use bytes::Bytes;

/// Closing tag that terminates every XML event frame
pub const EVENT_DELIMITER: &[u8] = b"</event>";

/// First byte of every binary frame
pub const MAGIC: u8 = 0xbf;

/// Protocol version byte following the magic byte
pub const PROTOCOL_VERSION: u8 = 0x01;

/// How a binary payload was delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFraming {
    /// `[magic, 1, magic] + payload`, payload is the rest of the delivery
    SinglePacket,
    /// `[magic, 1] + payload`, payload runs to the next header
    Stream,
}

/// One complete message extracted from a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A full `<event ...>...</event>` document, delimiter included
    Text(Bytes),
    /// A protobuf payload with its header stripped
    Binary { framing: BinaryFraming, payload: Bytes },
}

impl Frame {
    /// Bytes handed to the decoder, and retained on the entity for audit
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Text(bytes) => bytes,
            Frame::Binary { payload, .. } => payload,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary { .. })
    }
}

/// Result of pushing one delivery through the splitter
#[derive(Debug, Default)]
pub struct Split {
    pub frames: Vec<Frame>,
    /// Framing problems that were recovered by dropping or buffering
    pub dropped: Vec<FrameError>,
}

/// Stateful splitter for one delivery source.
///
/// A delivery whose first byte is the magic byte, arriving while no partial text frame is
/// pending, is split as binary. Everything else is appended to the text buffer. Pending bytes
/// that cannot be the start of an XML frame, such as the tail of a fragmented binary message,
/// are discarded when the next binary delivery arrives.
#[derive(Debug)]
pub struct FrameSplitter {
    text: TextSplitter,
}

impl FrameSplitter {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            text: TextSplitter::new(max_buffer_bytes),
        }
    }

    pub fn push(&mut self, delivery: &[u8]) -> Split {
        if delivery.is_empty() {
            return Split::default();
        }
        if delivery[0] == MAGIC && !is_partial_text(self.text.remainder()) {
            let mut split = Split::default();
            let pending = self.text.remainder();
            if pending.iter().any(|b| !b.is_ascii_whitespace()) {
                binary::drop_bytes(&mut split, pending, "stale non-text fragment");
            }
            self.text.reset();
            let binary = split_binary(Bytes::copy_from_slice(delivery));
            split.frames = binary.frames;
            split.dropped.extend(binary.dropped);
            return split;
        }
        self.text.push(delivery)
    }

    /// Partial text frame held back for the next delivery
    pub fn remainder(&self) -> &[u8] {
        self.text.remainder()
    }

    /// Discard any partial frame, e.g. when the source reconnects
    pub fn reset(&mut self) {
        self.text.reset();
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(crate::config::default_max_buffer_bytes())
    }
}

/// Whether pending bytes can still grow into an XML frame: the first non-whitespace byte opens
/// a tag and nothing is invalid UTF-8 (a truncated trailing character is allowed).
fn is_partial_text(pending: &[u8]) -> bool {
    let opens_tag = pending
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |b| *b == b'<');
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    };
    opens_tag && valid
}

/// Position of `needle` in `haystack` at or after `from`
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}
