//! Background retrieval of mission CoT content

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::ingest::{Ingestor, Notification, Transport, UpsertOptions};
use crate::mission::MissionApi;

/// Result of one mission download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub mission: String,
    pub fetched: usize,
    pub failed: usize,
}

/// Fetches CoT content a reconciliation found missing and feeds it back through ingestion
#[derive(Clone)]
pub struct ContentFetcher {
    api: Arc<dyn MissionApi>,
    ingestor: Arc<Ingestor>,
}

impl ContentFetcher {
    pub fn new(api: Arc<dyn MissionApi>, ingestor: Arc<Ingestor>) -> Self {
        Self { api, ingestor }
    }

    /// Start the download on the runtime. Completion is also announced on the change bus.
    pub fn spawn(
        &self,
        mission_id: u64,
        mission: String,
        uids: Vec<String>,
        token: Option<String>,
    ) -> JoinHandle<FetchSummary> {
        let fetcher = self.clone();
        tokio::spawn(async move {
            fetcher
                .fetch_all(mission_id, &mission, &uids, token.as_deref())
                .await
        })
    }

    /// Fetch every uid in turn. One failure never stops the rest.
    pub async fn fetch_all(
        &self,
        mission_id: u64,
        mission: &str,
        uids: &[String],
        token: Option<&str>,
    ) -> FetchSummary {
        let mut summary = FetchSummary {
            mission: mission.to_string(),
            ..FetchSummary::default()
        };
        for uid in uids {
            match self.fetch_one(mission_id, uid, token).await {
                Ok(()) => summary.fetched += 1,
                Err(err) => {
                    warn!(mission, uid = %uid, error = %err, "Failed to fetch mission content");
                    summary.failed += 1;
                }
            }
        }

        info!(
            mission,
            fetched = summary.fetched,
            failed = summary.failed,
            "Mission download completed"
        );
        self.ingestor
            .bus()
            .emit(Notification::MissionDownloadCompleted {
                mission: summary.mission.clone(),
                fetched: summary.fetched,
                failed: summary.failed,
            });
        summary
    }

    async fn fetch_one(&self, mission_id: u64, uid: &str, token: Option<&str>) -> Result<(), SyncError> {
        let body = self.api.fetch_cot(uid, token).await?;
        let report = self.ingestor.ingest_with(
            Transport::MissionFetch,
            &body,
            UpsertOptions {
                force_archive: true,
            },
        );
        let outcome = report
            .upserted
            .iter()
            .find(|outcome| outcome.uid == uid)
            .ok_or_else(|| {
                SyncError::InvalidResponse(format!("no persistable event for {} in response", uid))
            })?;

        let linked = self
            .ingestor
            .store()
            .writer()
            .link_mission_item(mission_id, uid, outcome.local_id)?;
        if !linked {
            debug!(uid, "Mission item removed before its content arrived");
        }
        Ok(())
    }
}
