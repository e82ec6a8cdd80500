//! Cursor-on-Target Events
//!
//! Canonical event model shared by both wire encodings, and the decoder that produces it from a
//! complete frame. Downstream code never needs to know which encoding an event arrived in.

pub mod proto;
pub mod xml;

use crate::error::DecodeError;
use crate::frame::Frame;
use chrono::{DateTime, Utc};

/// Value CoT uses for an unknown height or error estimate
pub const UNKNOWN: f64 = 9_999_999.0;

/// Which encoding an event was decoded from. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Xml,
    Protobuf,
}

/// Event kind, derived from the first segment of the type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `a-...`: a physical tracked entity
    Atom,
    /// `b-...`: a non-physical persistent item (markers, shapes, routes)
    Bit,
    /// `t-...`: tasking and control
    Tasking,
    /// `y-...`: reply to a tasking
    Reply,
    /// `c-...`: capability announcement
    Capability,
    Other,
}

impl EventKind {
    pub fn from_type(cot_type: &str) -> Self {
        match cot_type.split('-').next().unwrap_or_default() {
            "a" => EventKind::Atom,
            "b" => EventKind::Bit,
            "t" => EventKind::Tasking,
            "y" => EventKind::Reply,
            "c" => EventKind::Capability,
            _ => EventKind::Other,
        }
    }

    /// Atoms and bits are persisted; everything else is forwarded
    pub fn is_persistent(self) -> bool {
        matches!(self, EventKind::Atom | EventKind::Bit)
    }
}

/// Position and error estimates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub hae: f64,
    pub ce: f64,
    pub le: f64,
}

/// Typed child of `<detail>`
#[derive(Debug, Clone, PartialEq)]
pub enum DetailNode {
    Contact {
        callsign: String,
        endpoint: Option<String>,
        phone: Option<String>,
    },
    Group {
        name: String,
        role: String,
    },
    Icon {
        path: String,
    },
    Color {
        argb: i32,
    },
    Remarks {
        text: String,
    },
    Video {
        url: String,
    },
    Archive,
    Shape {
        raw: String,
    },
    FileShare {
        filename: String,
        name: String,
        sender_url: String,
        size_bytes: u64,
        sha256: String,
    },
    Track {
        course: f64,
        speed: f64,
    },
    /// Unrecognised element, kept verbatim
    Opaque {
        tag: String,
        raw: String,
    },
}

/// A decoded CoT event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    pub cot_type: String,
    pub how: String,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub stale: DateTime<Utc>,
    pub point: Option<Point>,
    pub details: Vec<DetailNode>,
    pub origin: WireFormat,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.cot_type)
    }

    pub fn is_archived(&self) -> bool {
        self.details.iter().any(|d| matches!(d, DetailNode::Archive))
    }

    /// First detail node the selector accepts
    pub fn find_detail<'a, T>(&'a self, select: impl Fn(&'a DetailNode) -> Option<T>) -> Option<T> {
        self.details.iter().find_map(select)
    }
}

/// Decode one complete frame into an event
pub fn decode(frame: &Frame) -> Result<Event, DecodeError> {
    match frame {
        Frame::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::InvalidValue {
                field: "frame",
                value: e.to_string(),
            })?;
            xml::parse_event(text)
        }
        Frame::Binary { payload, .. } => proto::decode_payload(payload),
    }
}
