//! Entity upsert policy: how a decoded event lands in the store

use tracing::{debug, info};

use crate::cot::{DetailNode, Event, UNKNOWN};
use crate::error::StorageError;
use crate::ingest::notify::{ChangeBus, Notification};
use crate::store::{
    EntityRecord, Store, DEFAULT_COLOR_ARGB, ENTITY_SCHEMA_VERSION, UNKNOWN_CALLSIGN,
};

/// Per-call upsert switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Mark the record archived even without an `<archive/>` node
    pub force_archive: bool,
}

/// What an upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub uid: String,
    pub local_id: u64,
    pub created: bool,
}

/// Apply one event to the store under the write lock.
///
/// Emits `EntityChanged`, plus `MigrationRequired` when the previous record carried an older
/// schema version.
pub fn upsert(
    store: &Store,
    bus: &ChangeBus,
    event: &Event,
    raw: &[u8],
    options: UpsertOptions,
) -> Result<UpsertOutcome, StorageError> {
    let applied = store
        .writer()
        .upsert_entity(&event.uid, |existing, local_id| {
            merge_record(existing, local_id, event, raw, options)
        })?;

    if let Some(previous) = &applied.previous {
        if previous.schema_version < ENTITY_SCHEMA_VERSION {
            info!(
                uid = %event.uid,
                from = previous.schema_version,
                to = ENTITY_SCHEMA_VERSION,
                "Migrated entity record"
            );
            bus.emit(Notification::MigrationRequired {
                uid: event.uid.clone(),
                from_version: previous.schema_version,
                to_version: ENTITY_SCHEMA_VERSION,
            });
        }
    }

    let outcome = UpsertOutcome {
        uid: applied.record.uid.clone(),
        local_id: applied.record.local_id,
        created: applied.created(),
    };
    debug!(
        uid = %outcome.uid,
        local_id = outcome.local_id,
        created = outcome.created,
        archived = applied.record.archived,
        "Upserted entity"
    );
    bus.emit(Notification::EntityChanged {
        uid: outcome.uid.clone(),
        local_id: outcome.local_id,
        created: outcome.created,
    });
    Ok(outcome)
}

/// Total mapping from an event onto a record. Only `created` survives from the existing record.
pub fn merge_record(
    existing: Option<&EntityRecord>,
    local_id: u64,
    event: &Event,
    raw: &[u8],
    options: UpsertOptions,
) -> EntityRecord {
    let (callsign, phone) = event
        .find_detail(|node| match node {
            DetailNode::Contact {
                callsign, phone, ..
            } => Some((callsign.clone(), phone.clone().unwrap_or_default())),
            _ => None,
        })
        .unwrap_or_default();
    let (team, role) = event
        .find_detail(|node| match node {
            DetailNode::Group { name, role } => Some((name.clone(), role.clone())),
            _ => None,
        })
        .unwrap_or_default();

    let (latitude, longitude, hae) = match event.point {
        Some(point) => (point.lat, point.lon, point.hae),
        None => (0.0, 0.0, UNKNOWN),
    };

    EntityRecord {
        local_id,
        uid: event.uid.clone(),
        callsign: if callsign.is_empty() {
            UNKNOWN_CALLSIGN.to_string()
        } else {
            callsign
        },
        cot_type: event.cot_type.clone(),
        how: event.how.clone(),
        icon_path: event
            .find_detail(|node| match node {
                DetailNode::Icon { path } => Some(path.clone()),
                _ => None,
            })
            .unwrap_or_default(),
        color_argb: event
            .find_detail(|node| match node {
                DetailNode::Color { argb } => Some(*argb),
                _ => None,
            })
            .unwrap_or(DEFAULT_COLOR_ARGB),
        remarks: event
            .find_detail(|node| match node {
                DetailNode::Remarks { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default(),
        phone,
        team,
        role,
        latitude,
        longitude,
        hae,
        created: existing.map(|r| r.created).unwrap_or(event.time),
        last_updated: event.time,
        stale_at: event.stale,
        archived: event.is_archived() || options.force_archive,
        visible: true,
        raw_payload: Some(raw.to_vec()),
        video_url: event.find_detail(|node| match node {
            DetailNode::Video { url } => Some(url.clone()),
            _ => None,
        }),
        schema_version: ENTITY_SCHEMA_VERSION,
    }
}
