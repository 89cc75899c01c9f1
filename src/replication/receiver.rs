//! Replication Receiver
//!
//! Applies inbound artifact broadcasts to the local artifact file on
//! followers.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::ReplicationMessage;
use crate::group::Inbound;
use crate::membership::{MembershipCoordinator, TermCheck};
use crate::storage::ArtifactStore;

/// What happened to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Written to the local artifact file
    Applied,
    /// We are leader; our own copy is authoritative
    IgnoredAsLeader,
    /// Sent under a term older than one we have seen
    StaleTerm,
    /// Payload could not be decoded
    Malformed,
    /// Local write failed; previous copy left in place
    PersistFailed,
}

/// Persists replicated artifacts on followers
pub struct ReplicationReceiver {
    cluster: Arc<MembershipCoordinator>,
    store: ArtifactStore,
}

impl ReplicationReceiver {
    pub fn new(cluster: Arc<MembershipCoordinator>, store: ArtifactStore) -> Self {
        Self { cluster, store }
    }

    /// Handle one inbound payload
    pub async fn on_message(&self, sender: &str, bytes: &[u8]) -> ReceiveOutcome {
        tracing::info!("Received a message from {}", sender);

        // Covers the loopback of our own broadcast
        if self.cluster.is_leader() {
            tracing::debug!("Ignoring message from {} while leader", sender);
            return ReceiveOutcome::IgnoredAsLeader;
        }

        let message = match ReplicationMessage::deserialize(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Discarding malformed message from {}: {}", sender, e);
                return ReceiveOutcome::Malformed;
            }
        };

        if let TermCheck::Stale { highest } = self.cluster.observe_term(message.term) {
            tracing::warn!(
                "Discarding artifact from {} under stale term {} (highest seen {})",
                sender,
                message.term,
                highest
            );
            return ReceiveOutcome::StaleTerm;
        }

        match self.store.write(&message.artifact).await {
            Ok(()) => ReceiveOutcome::Applied,
            Err(e) => {
                tracing::error!("Error saving received file: {}", e);
                ReceiveOutcome::PersistFailed
            }
        }
    }

    /// Consume inbound messages on a dedicated task
    pub fn spawn(self: Arc<Self>, mut messages: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(inbound) = messages.recv().await {
                self.on_message(&inbound.sender, &inbound.payload).await;
            }
            tracing::debug!("Replication receiver stopped");
        })
    }

    /// Local artifact store
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }
}
