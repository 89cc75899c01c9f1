//! HTTP Trigger Source
//!
//! Accepts `POST /notify` with the artifact locator as the request body.
//! The response is withheld until the notification has been ingested, so
//! a caller that sees anything but 200 should redeliver.

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{Acknowledgement, IngestOutcome, Notification, TriggerSource, TriggerSubscription};
use crate::error::{Error, Result};

/// Notifications buffered before callers are pushed back
const NOTIFY_QUEUE_DEPTH: usize = 64;

/// Response body for `POST /notify`
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub success: bool,
    pub outcome: Option<IngestOutcome>,
    pub message: Option<String>,
}

/// Notification listener bound while ingestion is active
pub struct HttpTriggerSource {
    bind_address: String,
}

impl HttpTriggerSource {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
        }
    }

    fn create_router(notifications: mpsc::Sender<Notification>) -> Router {
        Router::new()
            .route("/notify", post(handle_notify))
            .with_state(notifications)
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl TriggerSource for HttpTriggerSource {
    async fn open(&self) -> Result<TriggerSubscription> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| Error::Network(format!("Failed to bind notify listener on {}: {}", self.bind_address, e)))?;
        tracing::info!("Notify listener on {}", self.bind_address);

        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Self::create_router(tx);
        let address = self.bind_address.clone();

        let worker = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            match served {
                Ok(()) => tracing::info!("Notify listener on {} closed", address),
                Err(e) => tracing::error!("Notify listener error: {}", e),
            }
        });

        Ok(TriggerSubscription::new(rx, Some(shutdown_tx), Some(worker)))
    }
}

async fn handle_notify(
    State(notifications): State<mpsc::Sender<Notification>>,
    body: String,
) -> impl IntoResponse {
    let locator = body.trim();
    if locator.is_empty() {
        return reply(StatusCode::BAD_REQUEST, None, Some("empty locator".into()));
    }

    let (notification, ack) = Notification::new(locator);
    if notifications.send(notification).await.is_err() {
        return reply(StatusCode::SERVICE_UNAVAILABLE, None, Some("ingestion not active".into()));
    }

    match ack.await {
        Ok(Acknowledgement::Done(outcome)) => reply(StatusCode::OK, Some(outcome), None),
        Ok(Acknowledgement::Failed { reason, retryable: true }) => {
            reply(StatusCode::SERVICE_UNAVAILABLE, None, Some(reason))
        }
        Ok(Acknowledgement::Failed { reason, retryable: false }) => {
            reply(StatusCode::INTERNAL_SERVER_ERROR, None, Some(reason))
        }
        Err(_) => reply(StatusCode::SERVICE_UNAVAILABLE, None, Some("ingestion stopped".into())),
    }
}

fn reply(
    status: StatusCode,
    outcome: Option<IngestOutcome>,
    message: Option<String>,
) -> (StatusCode, Json<NotifyResponse>) {
    (
        status,
        Json(NotifyResponse {
            success: status.is_success(),
            outcome,
            message,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_address() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_notify_waits_for_ack() {
        let address = free_address();
        let source = HttpTriggerSource::new(address.clone());
        let mut subscription = source.open().await.unwrap();

        let consumer = tokio::spawn(async move {
            let notification = subscription.next().await.unwrap();
            assert_eq!(notification.locator, "s3://streams/live.m3u8");
            notification.ack(Acknowledgement::Done(IngestOutcome::Replicated));
            subscription.close().await;
        });

        let response = reqwest::Client::new()
            .post(format!("http://{}/notify", address))
            .body("s3://streams/live.m3u8\n")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: NotifyResponse = response.json().await.unwrap();
        assert_eq!(body.outcome, Some(IngestOutcome::Replicated));

        consumer.await.unwrap();
        // Listener released on close
        tokio::net::TcpListener::bind(&address).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_ingest_is_not_success() {
        let address = free_address();
        let source = HttpTriggerSource::new(address.clone());
        let mut subscription = source.open().await.unwrap();

        tokio::spawn(async move {
            let notification = subscription.next().await.unwrap();
            notification.ack(Acknowledgement::Failed {
                reason: "NoSuchKey".into(),
                retryable: false,
            });
            subscription.close().await;
        });

        let response = reqwest::Client::new()
            .post(format!("http://{}/notify", address))
            .body("s3://streams/missing.m3u8")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_open() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = holder.local_addr().unwrap().to_string();
        let source = HttpTriggerSource::new(address);
        assert!(matches!(source.open().await, Err(Error::Network(_))));
    }
}
