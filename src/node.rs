//! Node
//!
//! Wires one cluster member together: membership, the leadership gate,
//! the ingestion pipeline and the replication receiver.

use std::sync::{Arc, Mutex};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::gate::LeadershipGate;
use crate::group::{GroupTransport, MemberId};
use crate::ingest::{ArtifactSource, IngestionPipeline, Ingestor, TriggerSource};
use crate::membership::MembershipCoordinator;
use crate::replication::ReplicationReceiver;
use crate::storage::ArtifactStore;

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub group: String,
    pub is_leader: bool,
    pub term: u64,
    pub view_id: u64,
    pub members: Vec<MemberId>,
    pub gate: String,
    pub fingerprint: Option<String>,
    pub output_file: String,
}

/// A running cluster member
pub struct Node {
    cluster: Arc<MembershipCoordinator>,
    gate: Arc<LeadershipGate>,
    ingestor: Arc<Ingestor>,
    store: ArtifactStore,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Join `group` and start reacting to views and messages.
    ///
    /// Fails if the group cannot be joined; nothing is left running then.
    pub async fn start(
        group: &str,
        transport: &dyn GroupTransport,
        source: Arc<dyn ArtifactSource>,
        trigger: Arc<dyn TriggerSource>,
        store: ArtifactStore,
    ) -> Result<Self> {
        let (cluster, deliveries) = MembershipCoordinator::join(transport, group).await?;

        let receiver = Arc::new(ReplicationReceiver::new(Arc::clone(&cluster), store.clone()));
        let receiver_task = receiver.spawn(deliveries.messages);

        let ingestor = Arc::new(Ingestor::new(Arc::clone(&cluster), source, store.clone()));
        let pipeline = Arc::new(IngestionPipeline::new(trigger, Arc::clone(&ingestor)));
        let gate = Arc::new(LeadershipGate::new(pipeline));

        // Registered before the first view so the initial flip is seen
        cluster.register_listener(gate.listener());
        let view_task = cluster.spawn_view_delivery(deliveries.views);

        tracing::info!(
            "Node {} started, writing artifacts to {}",
            cluster.local_id(),
            store.path().display()
        );

        Ok(Self {
            cluster,
            gate,
            ingestor,
            store,
            tasks: Mutex::new(vec![receiver_task, view_task]),
        })
    }

    pub fn cluster(&self) -> &Arc<MembershipCoordinator> {
        &self.cluster
    }

    pub fn gate(&self) -> &Arc<LeadershipGate> {
        &self.gate
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Collect current status
    pub async fn status(&self) -> NodeStatus {
        let view = self.cluster.view();
        NodeStatus {
            node_id: self.cluster.local_id().to_string(),
            group: self.cluster.group().to_string(),
            is_leader: self.cluster.is_leader(),
            term: self.cluster.term(),
            view_id: view.view_id,
            members: view.members,
            gate: self.gate.state().to_string(),
            fingerprint: self.ingestor.fingerprint().await,
            output_file: self.store.path().display().to_string(),
        }
    }

    /// Stop ingestion, leave the group, and stop background tasks
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down node {}", self.cluster.local_id());

        self.gate.shutdown().await;
        if let Err(e) = self.cluster.shutdown().await {
            tracing::warn!("Error leaving group: {}", e);
        }

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
        }
    }
}
