//! Magic-byte-prefixed binary splitting.
//!
//! ```text
//! single packet: | 0xBF | 0x01 | 0xBF | payload ... end of delivery |
//! stream:        | 0xBF | 0x01 | payload ... | 0xBF | 0x01 | payload ... |
//! ```

use super::{find_subslice, BinaryFraming, Frame, Split, MAGIC, PROTOCOL_VERSION};
use crate::error::FrameError;
use bytes::Bytes;
use tracing::warn;

const HEADER: [u8; 2] = [MAGIC, PROTOCOL_VERSION];

/// Longest prefix of dropped bytes quoted in a warning
const MAX_QUOTED_BYTES: usize = 16;

/// Split one binary delivery. Unrecognised bytes are dropped up to the next header.
pub fn split_binary(delivery: Bytes) -> Split {
    let mut split = Split::default();
    let len = delivery.len();
    let mut pos = 0;

    while pos < len {
        if !delivery[pos..].starts_with(&HEADER) {
            let next = find_subslice(&delivery, &HEADER, pos + 1).unwrap_or(len);
            drop_bytes(&mut split, &delivery[pos..next], "unrecognised header");
            pos = next;
            continue;
        }

        let body = pos + HEADER.len();
        if delivery.get(body) == Some(&MAGIC) {
            let payload = delivery.slice(body + 1..len);
            if payload.is_empty() {
                drop_bytes(&mut split, &delivery[pos..len], "empty single-packet payload");
            } else {
                split.frames.push(Frame::Binary {
                    framing: BinaryFraming::SinglePacket,
                    payload,
                });
            }
            break;
        }

        let end = find_subslice(&delivery, &HEADER, body).unwrap_or(len);
        if end == body {
            drop_bytes(&mut split, &delivery[pos..body], "empty stream payload");
        } else {
            split.frames.push(Frame::Binary {
                framing: BinaryFraming::Stream,
                payload: delivery.slice(body..end),
            });
        }
        pos = end;
    }

    split
}

pub(super) fn drop_bytes(split: &mut Split, bytes: &[u8], reason: &str) {
    let quoted = &bytes[..bytes.len().min(MAX_QUOTED_BYTES)];
    let err = FrameError::MalformedHeader(format!(
        "{}: dropped {} bytes starting {}",
        reason,
        bytes.len(),
        hex::encode(quoted)
    ));
    warn!(error = %err, "Dropping malformed binary input");
    split.dropped.push(err);
}
