//! Frame splitting across fragmented deliveries

use cotsync::frame::{BinaryFraming, Frame, FrameSplitter};
use cotsync::ingest::Transport;

use super::support::{marker, tak_message, Harness};

#[test]
fn test_three_deliveries_yield_two_frames() {
    let mut splitter = FrameSplitter::default();
    let mut frames = Vec::new();
    for delivery in [
        &b"<event uid=\"1\"></ev"[..],
        &b"ent><event uid=\"2\">"[..],
        &b"</event>"[..],
    ] {
        frames.extend(splitter.push(delivery).frames);
    }

    assert_eq!(
        frames,
        vec![
            Frame::Text(b"<event uid=\"1\"></event>".to_vec().into()),
            Frame::Text(b"<event uid=\"2\"></event>".to_vec().into()),
        ]
    );
    assert!(splitter.remainder().is_empty());
}

#[test]
fn test_whitespace_between_events_is_not_a_frame() {
    let mut splitter = FrameSplitter::default();
    let split = splitter.push(b"<event uid=\"a\"/></event>\n  </event>\n");
    assert_eq!(split.frames.len(), 1);
    assert_eq!(splitter.remainder(), b"\n");
}

#[test]
fn test_binary_deliveries_bypass_text_buffer() {
    let mut splitter = FrameSplitter::default();
    let split = splitter.push(&[0xbf, 0x01, 0x0a, 0x00, 0xbf, 0x01, 0x12, 0x00]);
    assert_eq!(split.frames.len(), 2);
    assert!(split.frames.iter().all(|f| matches!(
        f,
        Frame::Binary {
            framing: BinaryFraming::Stream,
            ..
        }
    )));
    assert!(splitter.remainder().is_empty());
}

#[test]
fn test_oversized_partial_frame_is_discarded() {
    let mut splitter = FrameSplitter::new(1024);
    let mut garbage = b"<event uid=\"big\">".to_vec();
    garbage.extend(std::iter::repeat(b'x').take(2048));
    let split = splitter.push(&garbage);
    assert!(split.frames.is_empty());
    assert_eq!(split.dropped.len(), 1);
    assert!(splitter.remainder().is_empty());

    let split = splitter.push(b"<event uid=\"next\"></event>");
    assert_eq!(split.frames.len(), 1);
}

#[test]
fn test_fragmented_binary_on_stream_does_not_swallow_later_messages() {
    let harness = Harness::new();
    let split_message = tak_message("PART");

    let mut head = vec![0xbf, 0x01];
    head.extend_from_slice(&split_message[..8]);
    let report = harness.ingestor.ingest(Transport::Stream, &head);
    assert_eq!(report.decode_errors, 1, "truncated payload fails to decode");
    harness.ingestor.ingest(Transport::Stream, &split_message[8..]);

    let mut whole = vec![0xbf, 0x01, 0xbf];
    whole.extend_from_slice(&tak_message("GOOD"));
    let report = harness.ingestor.ingest(Transport::Stream, &whole);
    assert_eq!(report.frames, 1);
    assert_eq!(report.framing_errors, 1, "stale tail dropped");
    assert_eq!(report.upserted.len(), 1);
    assert_eq!(report.upserted[0].uid, "GOOD");

    let mut streamed = vec![0xbf, 0x01];
    streamed.extend_from_slice(&tak_message("AFTER"));
    let report = harness.ingestor.ingest(Transport::Stream, &streamed);
    assert_eq!(report.upserted.len(), 1);

    let report = harness.ingestor.ingest(Transport::Stream, marker("TEXT").as_bytes());
    assert_eq!(report.upserted.len(), 1);
    assert!(harness.store.find_entity_by_uid("PART").unwrap().is_none());
}
