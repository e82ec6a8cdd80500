//! Mission membership reconciliation.
//!
//! Compares the items a server declares for a mission against the mission items held locally,
//! then commits the whole delta in one store transaction. Entities shared with another mission
//! survive the removal of one of their references.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::SyncError;
use crate::ingest::{ChangeBus, Notification};
use crate::mission::MissionDescriptor;
use crate::store::{MissionDelta, MissionItemRecord, Store};

/// What one reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Item uids newly linked to the mission
    pub to_add: Vec<String>,
    /// Item uids unlinked from the mission
    pub to_remove: Vec<String>,
    /// CoT uids with no local entity yet; content must be fetched
    pub to_fetch: Vec<String>,
    /// Entities deleted because no mission references them any more
    pub removed_entities: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.removed_entities.is_empty()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<Store>,
    bus: ChangeBus,
}

impl Reconciler {
    pub fn new(store: Arc<Store>, bus: ChangeBus) -> Self {
        Self { store, bus }
    }

    /// Bring the local membership of `mission_id` in line with `descriptor`.
    ///
    /// The delta is computed and committed under the store write lock, so concurrent
    /// reconciliations of missions sharing a uid see each other's results. On error nothing is
    /// committed.
    pub fn reconcile(
        &self,
        mission_id: u64,
        descriptor: &MissionDescriptor,
    ) -> Result<ReconcileReport, SyncError> {
        let mut report = ReconcileReport::default();
        let mut delta = MissionDelta {
            mission_id,
            ..MissionDelta::default()
        };

        {
            let writer = self.store.writer();
            let local = writer.mission_items(mission_id)?;
            let local_uids: HashSet<&str> = local.iter().map(|item| item.uid.as_str()).collect();
            let incoming: HashSet<&str> = descriptor
                .items
                .iter()
                .map(|item| item.uid.as_str())
                .collect();

            for orphan in local.iter().filter(|item| !incoming.contains(item.uid.as_str())) {
                if orphan.is_cot {
                    let shared = writer
                        .items_for_uid(&orphan.uid)?
                        .iter()
                        .any(|item| item.mission_id != mission_id);
                    if !shared {
                        if let Some(entity) = writer.find_entity_by_uid(&orphan.uid)? {
                            delta
                                .remove_entities
                                .push((entity.local_id, entity.uid.clone()));
                            report.removed_entities.push(entity.uid);
                        }
                    }
                }
                delta.remove_items.push(orphan.uid.clone());
                report.to_remove.push(orphan.uid.clone());
            }

            let mut seen: HashSet<&str> = HashSet::new();
            for item in &descriptor.items {
                if !seen.insert(item.uid.as_str()) {
                    continue;
                }
                let entity = if item.is_cot() {
                    writer.find_entity_by_uid(&item.uid)?
                } else {
                    None
                };
                if item.is_cot() && entity.is_none() {
                    report.to_fetch.push(item.uid.clone());
                }
                if !local_uids.contains(item.uid.as_str()) {
                    delta.add_items.push(MissionItemRecord {
                        mission_id,
                        uid: item.uid.clone(),
                        entity_id: entity.map(|e| e.local_id),
                        is_cot: item.is_cot(),
                    });
                    report.to_add.push(item.uid.clone());
                }
            }

            writer.apply_mission_delta(&delta)?;
        }

        for (local_id, uid) in delta.remove_entities {
            self.bus.emit(Notification::EntityRemoved { uid, local_id });
        }

        if report.is_noop() {
            debug!(mission = %descriptor.name, fetch = report.to_fetch.len(), "Mission already in sync");
        } else {
            info!(
                mission = %descriptor.name,
                added = report.to_add.len(),
                removed = report.to_remove.len(),
                removed_entities = report.removed_entities.len(),
                fetch = report.to_fetch.len(),
                "Reconciled mission"
            );
        }
        Ok(report)
    }
}
