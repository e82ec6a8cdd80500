//! Entity and Mission Store
//!
//! Persistent records for observed CoT entities, subscribed missions and the items that join
//! them. All mutations go through a [`StoreWriter`], which holds the store's single write lock
//! and commits each logical operation as one sled transaction. Reads never take the lock.

pub mod persistence;

pub use persistence::{Store, StoreWriter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written on every entity. Older records raise a migration notice on upsert.
pub const ENTITY_SCHEMA_VERSION: u32 = 2;

/// Callsign used when an event carries no contact
pub const UNKNOWN_CALLSIGN: &str = "UNKNOWN";

/// Default CoT colour: opaque white
pub const DEFAULT_COLOR_ARGB: i32 = -1;

/// One persisted entity per observed uid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub local_id: u64,
    pub uid: String,
    pub callsign: String,
    pub cot_type: String,
    pub how: String,
    pub icon_path: String,
    pub color_argb: i32,
    pub remarks: String,
    pub phone: String,
    pub team: String,
    pub role: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hae: f64,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub stale_at: DateTime<Utc>,
    pub archived: bool,
    pub visible: bool,
    pub raw_payload: Option<Vec<u8>>,
    pub video_url: Option<String>,
    pub schema_version: u32,
}

/// One record per subscribed (or listed) mission on a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub mission_id: u64,
    pub name: String,
    pub server_host: String,
    pub password: Option<String>,
    pub token: Option<String>,
    pub creator_uid: String,
    pub groups: Vec<String>,
    pub guid: String,
    pub invite_only: bool,
    pub password_protected: bool,
    pub keywords: Vec<String>,
    pub description: String,
    pub create_time: Option<DateTime<Utc>>,
}

/// Join between a mission and an item it declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionItemRecord {
    pub mission_id: u64,
    pub uid: String,
    /// Local id of the backing entity, once one exists
    pub entity_id: Option<u64>,
    /// Position/CoT item rather than a file attachment
    pub is_cot: bool,
}

/// Changes applied by one reconciliation, committed atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissionDelta {
    pub mission_id: u64,
    pub remove_items: Vec<String>,
    /// (local id, uid) of entities no other mission still references
    pub remove_entities: Vec<(u64, String)>,
    pub add_items: Vec<MissionItemRecord>,
}

/// Selection predicate shared by the periodic and the on-demand sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepBounds {
    /// Only records whose `stale_at` is before this instant; `None` selects regardless
    pub cutoff: Option<DateTime<Utc>>,
    pub include_archived: bool,
}

impl SweepBounds {
    /// Non-archived records that went stale before `now`
    pub fn stale_before(now: DateTime<Utc>) -> Self {
        Self {
            cutoff: Some(now),
            include_archived: false,
        }
    }

    /// Every non-archived record
    pub fn transient() -> Self {
        Self {
            cutoff: None,
            include_archived: false,
        }
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        if record.archived && !self.include_archived {
            return false;
        }
        match self.cutoff {
            Some(cutoff) => record.stale_at < cutoff,
            None => true,
        }
    }
}
