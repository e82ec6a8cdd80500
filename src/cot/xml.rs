//! XML event parsing.
//!
//! The root `<event>` attributes are read directly; `<detail>` children are walked once and
//! matched by tag name. The same detail walker parses the `xmlDetail` string carried inside
//! binary messages.

use super::{DetailNode, Event, Point, WireFormat, UNKNOWN};
use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use std::collections::HashMap;

type Attributes = HashMap<String, String>;

/// Parse a complete `<event>` document. Bytes before the first `<event` are ignored.
pub fn parse_event(text: &str) -> Result<Event, DecodeError> {
    let start = find_event_start(text).ok_or(DecodeError::NotAnEvent)?;
    let xml = &text[start..];
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let (root, self_closing) = match reader.read_event()? {
        XmlEvent::Start(e) => (e, false),
        XmlEvent::Empty(e) => (e, true),
        _ => return Err(DecodeError::NotAnEvent),
    };
    if root.name().as_ref() != b"event" {
        return Err(DecodeError::NotAnEvent);
    }

    let attrs = attributes(&root)?;
    let uid = required(&attrs, "uid")?;
    let cot_type = required(&attrs, "type")?;
    let how = required(&attrs, "how")?;
    let time = parse_time("time", required(&attrs, "time")?)?;
    let start = parse_time("start", required(&attrs, "start")?)?;
    let stale = parse_time("stale", required(&attrs, "stale")?)?;

    let mut point = None;
    let mut details = Vec::new();

    if !self_closing {
        loop {
            match reader.read_event()? {
                XmlEvent::Start(e) => match e.name().as_ref() {
                    b"point" => {
                        point = Some(parse_point(&e)?);
                        reader.read_to_end(e.name())?;
                    }
                    b"detail" => details = walk_detail(&mut reader, xml)?,
                    _ => {
                        reader.read_to_end(e.name())?;
                    }
                },
                XmlEvent::Empty(e) => {
                    if e.name().as_ref() == b"point" {
                        point = Some(parse_point(&e)?);
                    }
                }
                XmlEvent::End(_) => break,
                XmlEvent::Eof => {
                    return Err(DecodeError::Xml("unterminated event element".to_string()))
                }
                _ => {}
            }
        }
    }

    Ok(Event {
        uid: uid.to_string(),
        cot_type: cot_type.to_string(),
        how: how.to_string(),
        time,
        start,
        stale,
        point,
        details,
        origin: WireFormat::Xml,
    })
}

/// Offset of the first `<event` open tag, skipping wrappers such as `<events>`
fn find_event_start(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = text[from..].find("<event") {
        let start = from + offset;
        match text[start + "<event".len()..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            _ => from = start + 1,
        }
    }
    None
}

/// Parse a bare sequence of detail children, as carried in a binary message's `xmlDetail`.
pub fn parse_detail_fragment(fragment: &str) -> Result<Vec<DetailNode>, DecodeError> {
    if fragment.trim().is_empty() {
        return Ok(Vec::new());
    }
    let wrapped = format!("<detail>{}</detail>", fragment);
    let mut reader = Reader::from_str(&wrapped);
    reader.trim_text(true);
    match reader.read_event()? {
        XmlEvent::Start(_) => walk_detail(&mut reader, &wrapped),
        _ => Err(DecodeError::Xml("detail fragment did not open".to_string())),
    }
}

/// Walk the children of an already-opened `<detail>` element up to its closing tag.
fn walk_detail(reader: &mut Reader<&[u8]>, source: &str) -> Result<Vec<DetailNode>, DecodeError> {
    let mut nodes = Vec::new();
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            XmlEvent::Start(e) => {
                let tag = e.name().as_ref().to_vec();
                let attrs = attributes(&e)?;
                let node = if tag == b"remarks" {
                    let text = reader.read_text(e.name())?;
                    let text = quick_xml::escape::unescape(&text)
                        .map_err(|err| DecodeError::Xml(err.to_string()))?;
                    Some(DetailNode::Remarks {
                        text: text.trim().to_string(),
                    })
                } else {
                    reader.read_to_end(e.name())?;
                    None
                };
                let raw = raw_slice(source, before, reader.buffer_position());
                nodes.push(match node {
                    Some(node) => node,
                    None => detail_node(&tag, &attrs, raw)?,
                });
            }
            XmlEvent::Empty(e) => {
                let attrs = attributes(&e)?;
                let raw = raw_slice(source, before, reader.buffer_position());
                nodes.push(detail_node(e.name().as_ref(), &attrs, raw)?);
            }
            XmlEvent::End(_) => break,
            XmlEvent::Eof => {
                return Err(DecodeError::Xml("unterminated detail element".to_string()))
            }
            _ => {}
        }
    }
    Ok(nodes)
}

fn detail_node(tag: &[u8], attrs: &Attributes, raw: &str) -> Result<DetailNode, DecodeError> {
    let text = |key: &str| attrs.get(key).cloned().unwrap_or_default();
    let node = match tag {
        b"contact" => DetailNode::Contact {
            callsign: text("callsign"),
            endpoint: attrs.get("endpoint").cloned(),
            phone: attrs.get("phone").cloned(),
        },
        b"__group" => DetailNode::Group {
            name: text("name"),
            role: text("role"),
        },
        b"usericon" => DetailNode::Icon {
            path: text("iconsetpath"),
        },
        b"color" if attrs.contains_key("argb") => DetailNode::Color {
            argb: parse_number("color.argb", &text("argb"))?,
        },
        b"remarks" => DetailNode::Remarks {
            text: String::new(),
        },
        b"__video" if attrs.contains_key("url") => DetailNode::Video { url: text("url") },
        b"archive" => DetailNode::Archive,
        b"shape" => DetailNode::Shape {
            raw: raw.to_string(),
        },
        b"fileshare" => DetailNode::FileShare {
            filename: text("filename"),
            name: text("name"),
            sender_url: text("senderUrl"),
            size_bytes: match attrs.get("sizeInBytes") {
                Some(size) => parse_number("fileshare.sizeInBytes", size)?,
                None => 0,
            },
            sha256: text("sha256"),
        },
        b"track" => DetailNode::Track {
            course: optional_float("track.course", attrs.get("course"), 0.0)?,
            speed: optional_float("track.speed", attrs.get("speed"), 0.0)?,
        },
        _ => DetailNode::Opaque {
            tag: String::from_utf8_lossy(tag).into_owned(),
            raw: raw.to_string(),
        },
    };
    Ok(node)
}

fn parse_point(e: &BytesStart) -> Result<Point, DecodeError> {
    let attrs = attributes(e)?;
    Ok(Point {
        lat: parse_number("point.lat", required(&attrs, "lat")?)?,
        lon: parse_number("point.lon", required(&attrs, "lon")?)?,
        hae: optional_float("point.hae", attrs.get("hae"), UNKNOWN)?,
        ce: optional_float("point.ce", attrs.get("ce"), UNKNOWN)?,
        le: optional_float("point.le", attrs.get("le"), UNKNOWN)?,
    })
}

fn attributes(e: &BytesStart) -> Result<Attributes, DecodeError> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DecodeError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn required<'a>(attrs: &'a Attributes, key: &'static str) -> Result<&'a str, DecodeError> {
    match attrs.get(key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DecodeError::MissingField(key)),
    }
}

fn raw_slice(source: &str, start: usize, end: usize) -> &str {
    source.get(start..end).unwrap_or_default().trim()
}

pub(crate) fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidValue {
            field,
            value: value.to_string(),
        })
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, DecodeError> {
    value.trim().parse().map_err(|_| DecodeError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn optional_float(
    field: &'static str,
    value: Option<&String>,
    default: f64,
) -> Result<f64, DecodeError> {
    match value {
        Some(v) => parse_number(field, v),
        None => Ok(default),
    }
}
