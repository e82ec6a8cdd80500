//! JSON bodies of the mission REST API.
//!
//! Every response wraps its payload in a `data` envelope. Dates come either as a bare
//! `YYYY-MM-DD` or as `YYYY-MM-DDTHH:MM:SS[.fff]Z`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::SyncError;
use crate::mission::{DescriptorItem, ItemKind, MissionDescriptor};

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMission {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    creator_uid: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    guid: Option<String>,
    #[serde(default)]
    invite_only: bool,
    #[serde(default)]
    password_protected: bool,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    uids: Vec<WireUid>,
    #[serde(default)]
    contents: Vec<WireContent>,
}

#[derive(Deserialize)]
struct WireUid {
    data: String,
    #[serde(default)]
    details: Option<WireUidDetails>,
}

#[derive(Deserialize)]
struct WireUidDetails {
    #[serde(rename = "type", default)]
    cot_type: String,
    #[serde(default)]
    callsign: String,
}

#[derive(Deserialize)]
struct WireContent {
    data: WireResource,
}

#[derive(Deserialize)]
struct WireResource {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct WireSubscription {
    #[serde(default)]
    token: Option<String>,
}

impl From<WireMission> for MissionDescriptor {
    fn from(wire: WireMission) -> Self {
        let mut items: Vec<DescriptorItem> = wire
            .uids
            .into_iter()
            .filter(|uid| !uid.data.is_empty())
            .map(|uid| {
                let (cot_type, callsign) = uid
                    .details
                    .map(|d| (d.cot_type, d.callsign))
                    .unwrap_or_default();
                DescriptorItem {
                    uid: uid.data,
                    kind: ItemKind::Cot { cot_type, callsign },
                }
            })
            .collect();

        // Content is keyed by uid when the server sends one, else by hash
        items.extend(wire.contents.into_iter().filter_map(|content| {
            let resource = content.data;
            let uid = if resource.uid.is_empty() {
                resource.hash.clone()
            } else {
                resource.uid
            };
            (!uid.is_empty()).then(|| DescriptorItem {
                uid,
                kind: ItemKind::Content {
                    name: resource.name,
                    hash: resource.hash,
                    size_bytes: resource.size,
                },
            })
        }));

        MissionDescriptor {
            name: wire.name,
            description: wire.description.unwrap_or_default(),
            creator_uid: wire.creator_uid.unwrap_or_default(),
            groups: wire.groups,
            guid: wire.guid.unwrap_or_default(),
            invite_only: wire.invite_only,
            password_protected: wire.password_protected,
            keywords: wire.keywords,
            create_time: wire.create_time,
            items,
        }
    }
}

/// Body of `GET /Marti/api/missions`
pub fn parse_mission_list(body: &[u8]) -> Result<Vec<MissionDescriptor>, SyncError> {
    let envelope: Envelope<Vec<WireMission>> = decode(body)?;
    Ok(envelope.data.into_iter().map(MissionDescriptor::from).collect())
}

/// Body of `GET /Marti/api/missions/{name}`. The server answers with a one-element list.
pub fn parse_mission_detail(body: &[u8], name: &str) -> Result<MissionDescriptor, SyncError> {
    let envelope: Envelope<Vec<WireMission>> = decode(body)?;
    envelope
        .data
        .into_iter()
        .map(MissionDescriptor::from)
        .find(|descriptor| descriptor.name == name)
        .ok_or_else(|| SyncError::InvalidResponse(format!("mission {} missing from response", name)))
}

/// Body of `PUT /Marti/api/missions/{name}/subscription`; yields the bearer token if any
pub fn parse_subscription(body: &[u8]) -> Result<Option<String>, SyncError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let envelope: Envelope<WireSubscription> = decode(body)?;
    Ok(envelope.data.token.filter(|t| !t.is_empty()))
}

/// Parse a server date: `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS[.fff]Z`
pub fn parse_server_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|value| {
        let parsed = parse_server_date(value);
        if parsed.is_none() {
            debug!(value, "Ignoring unparseable server date");
        }
        parsed
    }))
}

fn decode<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, SyncError> {
    serde_json::from_slice(body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
}
