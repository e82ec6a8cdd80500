//! Decoding frames from both encodings

use cotsync::cot::{decode, DetailNode, EventKind, WireFormat};
use cotsync::frame::FrameSplitter;

use super::support::{cot_xml, tak_message, STALE_SOON};

#[test]
fn test_single_packet_and_stream_framing_decode() {
    let payload = tak_message("ANDROID-7");

    let mut single = vec![0xbf, 0x01, 0xbf];
    single.extend_from_slice(&payload);
    let mut stream = vec![0xbf, 0x01];
    stream.extend_from_slice(&payload);

    for delivery in [single, stream] {
        let mut splitter = FrameSplitter::default();
        let split = splitter.push(&delivery);
        assert_eq!(split.frames.len(), 1);
        let event = decode(&split.frames[0]).unwrap();
        assert_eq!(event.uid, "ANDROID-7");
        assert_eq!(event.origin, WireFormat::Protobuf);
    }
}

#[test]
fn test_binary_and_text_agree_except_origin() {
    let detail = r#"<contact callsign="HAWK"/>"#;
    let xml = cot_xml("ANDROID-7", "a-f-G-U-C", STALE_SOON, detail);
    let mut splitter = FrameSplitter::default();
    let text_event = decode(&splitter.push(xml.as_bytes()).frames[0]).unwrap();

    let mut delivery = vec![0xbf, 0x01, 0xbf];
    delivery.extend_from_slice(&tak_message("ANDROID-7"));
    let mut binary_event = decode(&splitter.push(&delivery).frames[0]).unwrap();

    assert_eq!(binary_event.origin, WireFormat::Protobuf);
    binary_event.origin = WireFormat::Xml;
    assert_eq!(binary_event, text_event);
    assert_eq!(text_event.kind(), EventKind::Atom);
}

#[test]
fn test_unknown_detail_survives_as_opaque() {
    let xml = cot_xml(
        "u-1",
        "b-m-p-s-m",
        STALE_SOON,
        r#"<__chat parent="RootContactGroup"><chatgrp id="x"/></__chat><archive/>"#,
    );
    let mut splitter = FrameSplitter::default();
    let event = decode(&splitter.push(xml.as_bytes()).frames[0]).unwrap();
    assert!(event.is_archived());
    assert!(matches!(
        &event.details[0],
        DetailNode::Opaque { tag, raw } if tag == "__chat" && raw.contains("chatgrp")
    ));
}
