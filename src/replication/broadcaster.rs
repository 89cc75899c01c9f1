//! Replication Broadcaster

use std::sync::Arc;
use bytes::Bytes;

use super::protocol::ReplicationMessage;
use crate::error::Result;
use crate::membership::MembershipCoordinator;

/// Sends accepted artifacts to every member of the group
#[derive(Clone)]
pub struct ReplicationBroadcaster {
    cluster: Arc<MembershipCoordinator>,
}

impl ReplicationBroadcaster {
    pub fn new(cluster: Arc<MembershipCoordinator>) -> Self {
        Self { cluster }
    }

    /// Broadcast `artifact`, stamped with our current term.
    ///
    /// No chunking and no acknowledgement; members joining concurrently
    /// may miss it and catch up on the next change.
    pub async fn send(&self, artifact: &[u8]) -> Result<()> {
        let message = ReplicationMessage {
            term: self.cluster.term(),
            artifact: artifact.to_vec(),
        };
        let payload = message.serialize()?;
        tracing::info!(
            "Replicating {} byte artifact under term {}",
            artifact.len(),
            message.term
        );
        self.cluster.broadcast(Bytes::from(payload)).await
    }
}
