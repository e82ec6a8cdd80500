//! Shared fixtures: temporary stores, CoT builders and an in-memory mission server

use async_trait::async_trait;
use cotsync::cot::proto::{Contact, CotEvent, Detail, TakMessage};
use cotsync::error::SyncError;
use cotsync::ingest::{ChangeBus, Ingestor, Notification};
use cotsync::mission::{DescriptorItem, MissionApi, MissionDescriptor, SubscriptionGrant};
use cotsync::store::Store;
use parking_lot::Mutex;
use prost::Message;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tempfile::TempDir;

pub const T0: &str = "2024-03-01T12:00:00Z";
pub const STALE_SOON: &str = "2024-03-01T12:05:00Z";
pub const STALE_LATE: &str = "2030-01-01T00:00:00Z";

/// A store in a temporary directory; keep the `TempDir` alive for the test's duration
pub fn temp_store() -> (TempDir, Arc<Store>) {
    let dir = TempDir::new().unwrap();
    let store = Store::shared(dir.path().join("store")).unwrap();
    (dir, store)
}

pub struct Harness {
    pub _dir: TempDir,
    pub store: Arc<Store>,
    pub bus: ChangeBus,
    pub notifications: Receiver<Notification>,
    pub ingestor: Arc<Ingestor>,
}

impl Harness {
    pub fn new() -> Self {
        let (dir, store) = temp_store();
        let (bus, notifications) = ChangeBus::new_pair();
        let ingestor = Arc::new(Ingestor::new(store.clone(), bus.clone(), 64 * 1024));
        Self {
            _dir: dir,
            store,
            bus,
            notifications,
            ingestor,
        }
    }

    pub fn drain(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }
}

/// Complete XML event with a point and the given detail children
pub fn cot_xml(uid: &str, cot_type: &str, stale: &str, detail: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><event version="2.0" uid="{uid}" type="{cot_type}" how="m-g" time="{T0}" start="{T0}" stale="{stale}"><point lat="38.8895" lon="-77.0353" hae="12.5" ce="4.9" le="9999999.0"/><detail>{detail}</detail></event>"#
    )
}

pub fn marker(uid: &str) -> String {
    cot_xml(uid, "b-m-p-s-m", STALE_LATE, r#"<contact callsign="MARK"/>"#)
}

/// Protobuf-encoded friendly ground unit, without a framing header
pub fn tak_message(uid: &str) -> Vec<u8> {
    TakMessage {
        tak_control: None,
        cot_event: Some(CotEvent {
            r#type: "a-f-G-U-C".to_string(),
            uid: uid.to_string(),
            send_time: 1_709_294_400_000,
            start_time: 1_709_294_400_000,
            stale_time: 1_709_294_700_000,
            how: "m-g".to_string(),
            lat: 38.8895,
            lon: -77.0353,
            hae: 12.5,
            ce: 4.9,
            le: 9_999_999.0,
            detail: Some(Detail {
                contact: Some(Contact {
                    endpoint: String::new(),
                    callsign: "HAWK".to_string(),
                }),
                ..Detail::default()
            }),
            ..CotEvent::default()
        }),
    }
    .encode_to_vec()
}

pub fn descriptor(name: &str, cot_uids: &[&str]) -> MissionDescriptor {
    MissionDescriptor {
        name: name.to_string(),
        items: cot_uids.iter().map(|uid| DescriptorItem::cot(*uid)).collect(),
        ..MissionDescriptor::default()
    }
}

#[derive(Default)]
struct FakeState {
    missions: HashMap<String, MissionDescriptor>,
    passwords: HashMap<String, String>,
    cot: HashMap<String, String>,
    fail_unsubscribe: bool,
    unreachable: bool,
    subscribe_passwords: Vec<Option<String>>,
    unsubscribed: Vec<String>,
}

/// In-memory mission server
#[derive(Default)]
pub struct FakeMissionApi {
    state: Mutex<FakeState>,
}

impl FakeMissionApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_mission(&self, descriptor: MissionDescriptor, password: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(password) = password {
            state
                .passwords
                .insert(descriptor.name.clone(), password.to_string());
        }
        state.missions.insert(descriptor.name.clone(), descriptor);
    }

    pub fn add_cot(&self, uid: &str, body: String) {
        self.state.lock().cot.insert(uid.to_string(), body);
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.state.lock().fail_unsubscribe = fail;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn subscribe_passwords(&self) -> Vec<Option<String>> {
        self.state.lock().subscribe_passwords.clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.state.lock().unsubscribed.clone()
    }

    fn check(&self, name: &str, password: Option<&str>) -> Result<MissionDescriptor, SyncError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(SyncError::ServerUnreachable("connection refused".into()));
        }
        let mission = state
            .missions
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::RemoteStatus {
                status: 404,
                message: format!("no mission {}", name),
            })?;
        match state.passwords.get(name) {
            Some(expected) if Some(expected.as_str()) != password => {
                Err(SyncError::BadMissionPassword(name.to_string()))
            }
            _ => Ok(mission),
        }
    }
}

#[async_trait]
impl MissionApi for FakeMissionApi {
    async fn list_missions(&self) -> Result<Vec<MissionDescriptor>, SyncError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(SyncError::ServerUnreachable("connection refused".into()));
        }
        let mut missions: Vec<MissionDescriptor> = state.missions.values().cloned().collect();
        missions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(missions)
    }

    async fn mission_detail(
        &self,
        name: &str,
        password: Option<&str>,
        _token: Option<&str>,
    ) -> Result<MissionDescriptor, SyncError> {
        self.check(name, password)
    }

    async fn subscribe(
        &self,
        name: &str,
        password: Option<&str>,
        _client_uid: &str,
    ) -> Result<SubscriptionGrant, SyncError> {
        self.state
            .lock()
            .subscribe_passwords
            .push(password.map(str::to_string));
        self.check(name, password)?;
        Ok(SubscriptionGrant {
            token: Some(format!("token-{}", name)),
        })
    }

    async fn unsubscribe(
        &self,
        name: &str,
        _client_uid: &str,
        _token: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.unsubscribed.push(name.to_string());
        if state.fail_unsubscribe {
            return Err(SyncError::ServerUnreachable("connection reset".into()));
        }
        Ok(())
    }

    async fn fetch_cot(&self, uid: &str, _token: Option<&str>) -> Result<Vec<u8>, SyncError> {
        let state = self.state.lock();
        state
            .cot
            .get(uid)
            .map(|body| body.clone().into_bytes())
            .ok_or_else(|| SyncError::RemoteStatus {
                status: 404,
                message: format!("no cot for {}", uid),
            })
    }
}
