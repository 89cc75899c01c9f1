//! Ingestor
//!
//! Handles one notification end to end on the leader: fetch, detect
//! change, persist locally, and broadcast.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::ArtifactSource;
use crate::error::{Error, Result};
use crate::membership::MembershipCoordinator;
use crate::replication::{ChangeDetector, Decision, ReplicationBroadcaster};
use crate::storage::ArtifactStore;

/// Credential refreshes allowed per fetch
const MAX_CREDENTIAL_REFRESHES: u32 = 1;

/// Result of ingesting one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Changed artifact persisted and broadcast
    Replicated,
    /// Same bytes as the last accepted artifact
    Unchanged,
    /// Leadership was lost while fetching; nothing done
    NotLeader,
}

impl std::fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestOutcome::Replicated => write!(f, "replicated"),
            IngestOutcome::Unchanged => write!(f, "unchanged"),
            IngestOutcome::NotLeader => write!(f, "not_leader"),
        }
    }
}

/// Leader-side ingestion logic
pub struct Ingestor {
    cluster: Arc<MembershipCoordinator>,
    source: Arc<dyn ArtifactSource>,
    detector: Mutex<ChangeDetector>,
    broadcaster: ReplicationBroadcaster,
    store: ArtifactStore,
}

impl Ingestor {
    pub fn new(
        cluster: Arc<MembershipCoordinator>,
        source: Arc<dyn ArtifactSource>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            broadcaster: ReplicationBroadcaster::new(Arc::clone(&cluster)),
            cluster,
            source,
            detector: Mutex::new(ChangeDetector::new()),
            store,
        }
    }

    /// Ingest the artifact at `locator`.
    ///
    /// If the broadcast fails the previous fingerprint is put back, so a
    /// redelivery of the same artifact is broadcast again.
    pub async fn ingest(&self, locator: &str) -> Result<IngestOutcome> {
        let artifact = self.fetch(locator).await?;

        // Held through the broadcast so accepted artifacts go out in order
        let mut detector = self.detector.lock().await;

        if !self.cluster.is_leader() {
            tracing::info!("No longer leader, dropping artifact from {}", locator);
            return Ok(IngestOutcome::NotLeader);
        }

        let previous = detector.fingerprint().cloned();
        match detector.evaluate(&artifact) {
            Decision::Unchanged => {
                tracing::info!("No changes detected in {}", locator);
                Ok(IngestOutcome::Unchanged)
            }
            Decision::Changed => {
                tracing::info!("Changes detected in {}", locator);
                if let Err(e) = self.store.write(&artifact).await {
                    tracing::error!("Failed to save artifact locally: {}", e);
                }
                if let Err(e) = self.broadcaster.send(&artifact).await {
                    tracing::error!("Broadcast of {} failed: {}", locator, e);
                    detector.restore(previous);
                    return Err(e);
                }
                Ok(IngestOutcome::Replicated)
            }
        }
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let mut refreshes = 0;
        loop {
            match self.source.fetch(locator).await {
                Err(Error::ExpiredCredential(reason)) if refreshes < MAX_CREDENTIAL_REFRESHES => {
                    tracing::warn!("Credentials expired ({}), refreshing", reason);
                    refreshes += 1;
                    self.source.refresh_credentials().await?;
                }
                other => return other,
            }
        }
    }

    /// Fingerprint of the last accepted artifact
    pub async fn fingerprint(&self) -> Option<String> {
        self.detector
            .lock()
            .await
            .fingerprint()
            .map(|f| f.to_string())
    }
}
