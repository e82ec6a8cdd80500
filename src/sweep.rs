//! Staleness sweeping: one predicate, a periodic trigger and an on-demand trigger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::StorageError;
use crate::ingest::{ChangeBus, Notification};
use crate::store::{Store, SweepBounds};

#[derive(Clone)]
pub struct StaleSweeper {
    store: Arc<Store>,
    bus: ChangeBus,
}

impl StaleSweeper {
    pub fn new(store: Arc<Store>, bus: ChangeBus) -> Self {
        Self { store, bus }
    }

    /// Delete every record the bounds select and announce each removal
    pub fn sweep(&self, bounds: SweepBounds) -> Result<usize, StorageError> {
        let removed = self.store.writer().sweep(&bounds)?;
        for record in &removed {
            self.bus.emit(Notification::EntityRemoved {
                uid: record.uid.clone(),
                local_id: record.local_id,
            });
        }
        Ok(removed.len())
    }

    /// Remove non-archived records that went stale before `now`
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.sweep(SweepBounds::stale_before(now))
    }

    /// Remove every non-archived record regardless of staleness
    pub fn clear_transient(&self) -> Result<usize, StorageError> {
        let removed = self.sweep(SweepBounds::transient())?;
        info!(removed, "Cleared transient entities");
        Ok(removed)
    }

    /// Sweep on a fixed interval until the handle is aborted. Missed ticks are skipped.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.sweep_expired(Utc::now()) {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Swept stale entities"),
                    Err(err) => error!(error = %err, "Stale sweep failed"),
                }
            }
        })
    }
}
