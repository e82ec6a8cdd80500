//! Per-mission subscription lifecycle.
//!
//! ```text
//! Unsubscribed -> Subscribing -> Subscribed -> Unsubscribing -> Unsubscribed
//!                      ^              |
//!                      +--------------+   reconnect / refresh
//! ```
//!
//! Transitions are checked and applied atomically; a second operation on a mission that is
//! mid-transition fails with `InvalidState` instead of racing it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{StorageError, SyncError};
use crate::ingest::Ingestor;
use crate::mission::{
    dedupe_latest, ContentFetcher, FetchSummary, MissionApi, MissionDescriptor, ReconcileReport,
    Reconciler, RetryPolicy, SubscriptionState,
};
use crate::store::{MissionRecord, Store};

use crate::mission::SubscriptionState::{Subscribed, Subscribing, Unsubscribed, Unsubscribing};

/// Result of subscribing to or refreshing a mission
#[derive(Debug)]
pub struct MissionSync {
    pub mission: MissionRecord,
    pub report: ReconcileReport,
    /// Content download started for `report.to_fetch`
    pub download: JoinHandle<FetchSummary>,
}

pub struct SubscriptionController {
    store: Arc<Store>,
    api: Arc<dyn MissionApi>,
    reconciler: Reconciler,
    fetcher: ContentFetcher,
    server_host: String,
    client_uid: String,
    retry: RetryPolicy,
    states: RwLock<HashMap<String, SubscriptionState>>,
}

impl SubscriptionController {
    pub fn new(
        ingestor: Arc<Ingestor>,
        api: Arc<dyn MissionApi>,
        server_host: impl Into<String>,
        client_uid: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let store = ingestor.store().clone();
        let reconciler = Reconciler::new(store.clone(), ingestor.bus().clone());
        let fetcher = ContentFetcher::new(api.clone(), ingestor);
        Self {
            store,
            api,
            reconciler,
            fetcher,
            server_host: server_host.into(),
            client_uid: client_uid.into(),
            retry,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(
        ingestor: Arc<Ingestor>,
        api: Arc<dyn MissionApi>,
        server: &ServerConfig,
    ) -> Self {
        Self::new(
            ingestor,
            api,
            server.host.clone(),
            server.client_uid.clone(),
            RetryPolicy::from_config(server),
        )
    }

    pub fn state(&self, name: &str) -> SubscriptionState {
        self.states.read().get(name).copied().unwrap_or_default()
    }

    /// Names of every mission currently subscribed
    pub fn subscribed(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .read()
            .iter()
            .filter(|(_, state)| **state == Subscribed)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Subscribe, fetch the mission, reconcile it and start downloading missing content.
    ///
    /// Any failure leaves the mission unsubscribed. A rejected password surfaces as
    /// `BadMissionPassword` so the caller can prompt and retry.
    pub async fn subscribe(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<MissionSync, SyncError> {
        self.transition(name, &[Unsubscribed], Subscribing, "subscribe")?;
        info!(mission = name, "Subscribing to mission");

        match self.establish(name, password).await {
            Ok(sync) => {
                self.settle(name, Subscribed);
                info!(mission = name, mission_id = sync.mission.mission_id, "Subscribed to mission");
                Ok(sync)
            }
            Err(err) => {
                self.settle(name, Unsubscribed);
                warn!(mission = name, error = %err, user_visible = err.is_user_visible(), "Subscription failed");
                Err(err)
            }
        }
    }

    /// Retry a subscription with the password the user just entered
    pub async fn complete_password_prompt(
        &self,
        name: &str,
        password: &str,
    ) -> Result<MissionSync, SyncError> {
        self.subscribe(name, Some(password)).await
    }

    /// Re-subscribe every subscribed mission with its cached password.
    ///
    /// A failed re-subscription keeps the mission subscribed so the next reconnect tries again.
    pub async fn on_reconnect(&self) -> Vec<(String, Result<MissionSync, SyncError>)> {
        let mut results = Vec::new();
        for name in self.subscribed() {
            if self
                .transition(&name, &[Subscribed], Subscribing, "resubscribe")
                .is_err()
            {
                continue;
            }

            let result = match self.store.find_mission(&self.server_host, &name) {
                Ok(Some(record)) => self.establish(&name, record.password.as_deref()).await,
                Ok(None) => Err(StorageError::MissionNotFound(name.clone()).into()),
                Err(err) => Err(err.into()),
            };

            match &result {
                Ok(_) => {
                    self.settle(&name, Subscribed);
                    info!(mission = %name, "Resubscribed after reconnect");
                }
                Err(SyncError::Storage(StorageError::MissionNotFound(_))) => {
                    self.settle(&name, Unsubscribed);
                    warn!(mission = %name, "Mission record vanished; dropping subscription");
                }
                Err(err) => {
                    self.settle(&name, Subscribed);
                    warn!(mission = %name, error = %err, "Resubscribe failed; will retry on next reconnect");
                }
            }
            results.push((name, result));
        }
        results
    }

    /// Run [`Self::on_reconnect`] on the runtime so the reconnected transport can start reading
    /// while missions resubscribe.
    pub fn spawn_reconnect(
        self: &Arc<Self>,
    ) -> JoinHandle<Vec<(String, Result<MissionSync, SyncError>)>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.on_reconnect().await })
    }

    /// Fetch and reconcile a subscribed mission using its cached credentials
    pub async fn refresh(&self, name: &str) -> Result<MissionSync, SyncError> {
        self.transition(name, &[Subscribed], Subscribing, "refresh")?;
        let result = match self.store.find_mission(&self.server_host, name) {
            Ok(Some(record)) => {
                self.synchronize(name, record.password.clone(), record.token.clone())
                    .await
            }
            Ok(None) => Err(StorageError::MissionNotFound(name.to_string()).into()),
            Err(err) => Err(err.into()),
        };
        self.settle(name, Subscribed);
        result
    }

    /// Drop a mission locally, then tell the server. The server call is best effort.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), SyncError> {
        let prior = self.transition(
            name,
            &[Subscribed, Unsubscribed],
            Unsubscribing,
            "unsubscribe",
        )?;

        let token = match self.remove_local(name) {
            Ok(token) => token,
            Err(err) => {
                self.settle(name, prior);
                return Err(err);
            }
        };

        if let Err(err) = self
            .api
            .unsubscribe(name, &self.client_uid, token.as_deref())
            .await
        {
            warn!(mission = name, error = %err, "Server unsubscribe failed; local state already removed");
        }
        self.settle(name, Unsubscribed);
        info!(mission = name, "Unsubscribed from mission");
        Ok(())
    }

    /// List the server's missions and record them, keeping cached credentials.
    pub async fn refresh_mission_list(&self) -> Result<Vec<MissionRecord>, SyncError> {
        let listed = self
            .retry
            .run("list_missions", || self.api.list_missions())
            .await?;
        let descriptors = dedupe_latest(listed);

        let writer = self.store.writer();
        let mut records = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let record = writer.upsert_mission(&self.server_host, &descriptor.name, |previous, id| {
                mission_record(
                    id,
                    &self.server_host,
                    &descriptor.name,
                    descriptor,
                    previous.and_then(|p| p.password.clone()),
                    previous.and_then(|p| p.token.clone()),
                )
            })?;
            records.push(record);
        }
        info!(count = records.len(), "Refreshed mission list");
        Ok(records)
    }

    async fn establish(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<MissionSync, SyncError> {
        let grant = self
            .retry
            .run("subscribe", || {
                self.api.subscribe(name, password, &self.client_uid)
            })
            .await?;
        self.synchronize(name, password.map(str::to_string), grant.token)
            .await
    }

    async fn synchronize(
        &self,
        name: &str,
        password: Option<String>,
        token: Option<String>,
    ) -> Result<MissionSync, SyncError> {
        let descriptor = self
            .retry
            .run("mission_detail", || {
                self.api
                    .mission_detail(name, password.as_deref(), token.as_deref())
            })
            .await?;

        let mission = self.store.writer().upsert_mission(
            &self.server_host,
            name,
            |previous, id| {
                mission_record(
                    id,
                    &self.server_host,
                    name,
                    &descriptor,
                    password
                        .clone()
                        .or_else(|| previous.and_then(|p| p.password.clone())),
                    token.clone(),
                )
            },
        )?;
        let report = self.reconciler.reconcile(mission.mission_id, &descriptor)?;
        let download = self.fetcher.spawn(
            mission.mission_id,
            name.to_string(),
            report.to_fetch.clone(),
            token,
        );
        Ok(MissionSync {
            mission,
            report,
            download,
        })
    }

    /// Orphan every item, then delete the record. Returns the token the server issued.
    fn remove_local(&self, name: &str) -> Result<Option<String>, SyncError> {
        let Some(record) = self.store.find_mission(&self.server_host, name)? else {
            return Ok(None);
        };
        self.reconciler
            .reconcile(record.mission_id, &MissionDescriptor::empty(name))?;
        self.store.writer().delete_mission(record.mission_id)?;
        Ok(record.token)
    }

    /// Check-and-set a transition. Returns the state the mission was in.
    fn transition(
        &self,
        name: &str,
        from: &[SubscriptionState],
        to: SubscriptionState,
        action: &'static str,
    ) -> Result<SubscriptionState, SyncError> {
        let mut states = self.states.write();
        let current = states.get(name).copied().unwrap_or_default();
        if !from.contains(&current) {
            return Err(SyncError::InvalidState {
                mission: name.to_string(),
                state: current.as_str().to_string(),
                action,
            });
        }
        states.insert(name.to_string(), to);
        Ok(current)
    }

    fn settle(&self, name: &str, state: SubscriptionState) {
        let mut states = self.states.write();
        if state == Unsubscribed {
            states.remove(name);
        } else {
            states.insert(name.to_string(), state);
        }
    }
}

fn mission_record(
    mission_id: u64,
    server_host: &str,
    name: &str,
    descriptor: &MissionDescriptor,
    password: Option<String>,
    token: Option<String>,
) -> MissionRecord {
    MissionRecord {
        mission_id,
        name: name.to_string(),
        server_host: server_host.to_string(),
        password,
        token,
        creator_uid: descriptor.creator_uid.clone(),
        groups: descriptor.groups.clone(),
        guid: descriptor.guid.clone(),
        invite_only: descriptor.invite_only,
        password_protected: descriptor.password_protected,
        keywords: descriptor.keywords.clone(),
        description: descriptor.description.clone(),
        create_time: descriptor.create_time,
    }
}
