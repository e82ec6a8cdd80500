//! TAK protocol v1 binary messages.
//!
//! Message definitions mirror `takmessage.proto` / `cotevent.proto` / `detail.proto`. Optional
//! sub-messages decode to `Option<T>`, so presence is explicit rather than inferred from
//! default values.

use super::xml::parse_detail_fragment;
use super::{DetailNode, Event, Point, WireFormat};
use crate::error::DecodeError;
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use quick_xml::escape::escape;

#[derive(Clone, PartialEq, Message)]
pub struct TakMessage {
    #[prost(message, optional, tag = "1")]
    pub tak_control: Option<TakControl>,
    #[prost(message, optional, tag = "2")]
    pub cot_event: Option<CotEvent>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TakControl {
    #[prost(uint32, tag = "1")]
    pub min_proto_version: u32,
    #[prost(uint32, tag = "2")]
    pub max_proto_version: u32,
    #[prost(string, tag = "3")]
    pub contact_uid: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct CotEvent {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub access: String,
    #[prost(string, tag = "3")]
    pub qos: String,
    #[prost(string, tag = "4")]
    pub opex: String,
    #[prost(string, tag = "5")]
    pub uid: String,
    /// Milliseconds since the Unix epoch
    #[prost(uint64, tag = "6")]
    pub send_time: u64,
    #[prost(uint64, tag = "7")]
    pub start_time: u64,
    #[prost(uint64, tag = "8")]
    pub stale_time: u64,
    #[prost(string, tag = "9")]
    pub how: String,
    #[prost(double, tag = "10")]
    pub lat: f64,
    #[prost(double, tag = "11")]
    pub lon: f64,
    #[prost(double, tag = "12")]
    pub hae: f64,
    #[prost(double, tag = "13")]
    pub ce: f64,
    #[prost(double, tag = "14")]
    pub le: f64,
    #[prost(message, optional, tag = "15")]
    pub detail: Option<Detail>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Detail {
    /// Remaining detail children as an XML fragment
    #[prost(string, tag = "1")]
    pub xml_detail: String,
    #[prost(message, optional, tag = "2")]
    pub contact: Option<Contact>,
    #[prost(message, optional, tag = "3")]
    pub group: Option<Group>,
    #[prost(message, optional, tag = "4")]
    pub precision_location: Option<PrecisionLocation>,
    #[prost(message, optional, tag = "5")]
    pub status: Option<Status>,
    #[prost(message, optional, tag = "6")]
    pub takv: Option<Takv>,
    #[prost(message, optional, tag = "7")]
    pub track: Option<Track>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Contact {
    #[prost(string, tag = "1")]
    pub endpoint: String,
    #[prost(string, tag = "2")]
    pub callsign: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Group {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub role: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrecisionLocation {
    #[prost(string, tag = "1")]
    pub geopointsrc: String,
    #[prost(string, tag = "2")]
    pub altsrc: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Status {
    #[prost(uint32, tag = "1")]
    pub battery: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Takv {
    #[prost(string, tag = "1")]
    pub device: String,
    #[prost(string, tag = "2")]
    pub platform: String,
    #[prost(string, tag = "3")]
    pub os: String,
    #[prost(string, tag = "4")]
    pub version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Track {
    #[prost(double, tag = "1")]
    pub speed: f64,
    #[prost(double, tag = "2")]
    pub course: f64,
}

/// Decode a binary frame payload into an event
pub fn decode_payload(payload: &[u8]) -> Result<Event, DecodeError> {
    let message = TakMessage::decode(payload)?;
    let cot = message.cot_event.ok_or(DecodeError::EmptyMessage)?;

    let uid = non_empty("uid", cot.uid)?;
    let cot_type = non_empty("type", cot.r#type)?;
    let how = non_empty("how", cot.how)?;
    let time = millis("time", cot.send_time)?;
    let start = millis("start", cot.start_time)?;
    let stale = millis("stale", cot.stale_time)?;

    let details = match cot.detail {
        Some(detail) => detail_nodes(detail)?,
        None => Vec::new(),
    };

    Ok(Event {
        uid,
        cot_type,
        how,
        time,
        start,
        stale,
        point: Some(Point {
            lat: cot.lat,
            lon: cot.lon,
            hae: cot.hae,
            ce: cot.ce,
            le: cot.le,
        }),
        details,
        origin: WireFormat::Protobuf,
    })
}

/// Materialise present sub-messages first, then the `xmlDetail` remainder.
fn detail_nodes(detail: Detail) -> Result<Vec<DetailNode>, DecodeError> {
    let mut nodes = Vec::new();

    if let Some(contact) = detail.contact {
        nodes.push(DetailNode::Contact {
            callsign: contact.callsign,
            endpoint: Some(contact.endpoint).filter(|e| !e.is_empty()),
            phone: None,
        });
    }
    if let Some(group) = detail.group {
        nodes.push(DetailNode::Group {
            name: group.name,
            role: group.role,
        });
    }
    if let Some(location) = detail.precision_location {
        nodes.push(opaque(
            "precisionlocation",
            &[
                ("altsrc", location.altsrc.as_str()),
                ("geopointsrc", location.geopointsrc.as_str()),
            ],
        ));
    }
    if let Some(status) = detail.status {
        nodes.push(opaque(
            "status",
            &[("battery", status.battery.to_string().as_str())],
        ));
    }
    if let Some(takv) = detail.takv {
        nodes.push(opaque(
            "takv",
            &[
                ("device", takv.device.as_str()),
                ("platform", takv.platform.as_str()),
                ("os", takv.os.as_str()),
                ("version", takv.version.as_str()),
            ],
        ));
    }
    if let Some(track) = detail.track {
        nodes.push(DetailNode::Track {
            course: track.course,
            speed: track.speed,
        });
    }

    nodes.extend(parse_detail_fragment(&detail.xml_detail)?);
    Ok(nodes)
}

/// Render a sub-message the way the XML encoding would carry it
fn opaque(tag: &str, attrs: &[(&str, &str)]) -> DetailNode {
    let mut raw = format!("<{}", tag);
    for (key, value) in attrs {
        raw.push_str(&format!(" {}=\"{}\"", key, escape(value)));
    }
    raw.push_str("/>");
    DetailNode::Opaque {
        tag: tag.to_string(),
        raw,
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, DecodeError> {
    if value.is_empty() {
        Err(DecodeError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn millis(field: &'static str, value: u64) -> Result<DateTime<Utc>, DecodeError> {
    if value == 0 {
        return Err(DecodeError::MissingField(field));
    }
    i64::try_from(value)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| DecodeError::InvalidValue {
            field,
            value: value.to_string(),
        })
}
