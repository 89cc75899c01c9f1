//! HTTP API Server

use std::sync::Arc;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::node::Node;

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    node: Arc<Node>,
}

impl HttpServer {
    pub fn new(config: ApiConfig, node: Arc<Node>) -> Self {
        Self { config, node }
    }

    fn create_router(node: Arc<Node>) -> Router {
        Router::new()
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .with_state(node)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the process exits
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.node));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub is_leader: bool,
}

async fn handle_status(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.status().await)
}

async fn handle_health(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let cluster = node.cluster();
    Json(HealthResponse {
        healthy: cluster.view().contains(cluster.local_id()),
        node_id: cluster.local_id().to_string(),
        is_leader: cluster.is_leader(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::group::LocalGroupHub;
    use crate::ingest::testing::{ChannelTrigger, MemorySource};
    use crate::node::NodeStatus;
    use crate::storage::ArtifactStore;

    #[tokio::test]
    async fn test_status_endpoint() {
        let hub = LocalGroupHub::new();
        let dir = tempdir().unwrap();
        let node = Node::start(
            "g",
            &hub.transport("solo"),
            Arc::new(MemorySource::new()),
            Arc::new(ChannelTrigger::new()),
            ArtifactStore::new(dir.path().join("replicated_file.m3u8")),
        )
        .await
        .unwrap();
        let node = Arc::new(node);

        let address = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().to_string()
        };
        let server = HttpServer::new(
            ApiConfig {
                enabled: true,
                bind_address: address.clone(),
            },
            Arc::clone(&node),
        );
        tokio::spawn(async move { server.start().await });

        let client = reqwest::Client::new();
        let mut status = None;
        for _ in 0..100 {
            if let Ok(response) = client.get(format!("http://{}/status", address)).send().await {
                status = Some(response.json::<NodeStatus>().await.unwrap());
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let status = status.unwrap();
        assert_eq!(status.node_id, "solo");
        assert_eq!(status.group, "g");
        assert!(status.output_file.ends_with("replicated_file.m3u8"));

        let health: HealthResponse = client
            .get(format!("http://{}/health", address))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.node_id, "solo");

        node.shutdown().await;
    }
}
