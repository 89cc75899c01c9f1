//! Ingestion Pipeline
//!
//! The switchable consumer the leadership gate drives: `start` opens the
//! trigger source and spawns a consumer task, `stop` cancels it. A
//! notification already being processed is finished and acknowledged
//! before the consumer exits.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Acknowledgement, Ingestor, TriggerSource, TriggerSubscription};
use crate::error::Result;
use crate::gate::IngestionPath;

struct Consumer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Trigger source wired to the ingestor
pub struct IngestionPipeline {
    trigger: Arc<dyn TriggerSource>,
    ingestor: Arc<Ingestor>,
    consumer: Mutex<Option<Consumer>>,
}

impl IngestionPipeline {
    pub fn new(trigger: Arc<dyn TriggerSource>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            trigger,
            ingestor,
            consumer: Mutex::new(None),
        }
    }

    /// Whether a consumer task is running
    pub async fn is_running(&self) -> bool {
        self.consumer.lock().await.is_some()
    }
}

#[async_trait]
impl IngestionPath for IngestionPipeline {
    async fn start(&self) -> Result<()> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Ok(());
        }

        let subscription = self.trigger.open().await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(consume(
            subscription,
            Arc::clone(&self.ingestor),
            cancel.clone(),
        ));
        *consumer = Some(Consumer { cancel, task });
        Ok(())
    }

    async fn stop(&self) {
        let Some(consumer) = self.consumer.lock().await.take() else {
            return;
        };
        consumer.cancel.cancel();
        if let Err(e) = consumer.task.await {
            tracing::warn!("Ingestion consumer ended abnormally: {}", e);
        }
    }
}

async fn consume(
    mut subscription: TriggerSubscription,
    ingestor: Arc<Ingestor>,
    cancel: CancellationToken,
) {
    tracing::info!("Waiting for notifications");

    loop {
        let notification = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = subscription.next() => match next {
                Some(notification) => notification,
                None => {
                    tracing::warn!("Trigger source closed");
                    break;
                }
            },
        };

        tracing::info!("Received notification for {}", notification.locator);
        let ack = match ingestor.ingest(&notification.locator).await {
            Ok(outcome) => Acknowledgement::Done(outcome),
            Err(e) => {
                tracing::error!("Error processing {}: {}", notification.locator, e);
                Acknowledgement::Failed {
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };
        notification.ack(ack);
    }

    subscription.close().await;
    tracing::info!("Stopped consuming notifications");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Notify;
    use crate::group::{GroupView, LocalGroupHub};
    use crate::ingest::testing::{ChannelTrigger, MemorySource};
    use crate::ingest::{ArtifactSource, IngestOutcome, Notification};
    use crate::membership::MembershipCoordinator;
    use crate::storage::ArtifactStore;

    const LOCATOR: &str = "s3://streams/live/index.m3u8";

    /// Parks every fetch until released
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ArtifactSource for GatedSource {
        async fn fetch(&self, _locator: &str) -> Result<Vec<u8>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(b"#EXTM3U\n".to_vec())
        }

        async fn refresh_credentials(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pipeline_acks_after_ingest() {
        let hub = LocalGroupHub::new();
        let dir = tempdir().unwrap();
        let (cluster, _deliveries) = MembershipCoordinator::join(&hub.transport("a"), "g")
            .await
            .unwrap();
        cluster.on_view_change(GroupView::new(1, vec!["a".into()]));

        let source = Arc::new(MemorySource::new());
        source.put(LOCATOR, b"#EXTM3U\n");
        let ingestor = Arc::new(Ingestor::new(
            cluster,
            source,
            ArtifactStore::new(dir.path().join("out.m3u8")),
        ));
        let trigger = Arc::new(ChannelTrigger::new());
        let pipeline = IngestionPipeline::new(trigger.clone(), ingestor);

        pipeline.start().await.unwrap();
        pipeline.start().await.unwrap();
        assert_eq!(trigger.opens.load(Ordering::SeqCst), 1);

        assert_eq!(trigger.notify(LOCATOR).await, Acknowledgement::Done(IngestOutcome::Replicated));
        assert_eq!(trigger.notify(LOCATOR).await, Acknowledgement::Done(IngestOutcome::Unchanged));

        match trigger.notify("s3://streams/missing.m3u8").await {
            Acknowledgement::Failed { reason, .. } => assert!(reason.contains("NoSuchKey")),
            other => panic!("unexpected acknowledgement: {:?}", other),
        }

        pipeline.stop().await;
        assert!(!pipeline.is_running().await);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_in_flight_notification_acked_after_stop() {
        let hub = LocalGroupHub::new();
        let dir = tempdir().unwrap();
        let (cluster, _deliveries) = MembershipCoordinator::join(&hub.transport("a"), "g")
            .await
            .unwrap();
        cluster.on_view_change(GroupView::new(1, vec!["a".into()]));

        let source = Arc::new(GatedSource::default());
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&cluster),
            source.clone(),
            ArtifactStore::new(dir.path().join("out.m3u8")),
        ));
        let trigger = Arc::new(ChannelTrigger::new());
        let pipeline = Arc::new(IngestionPipeline::new(trigger.clone(), ingestor));
        pipeline.start().await.unwrap();

        let (notification, ack) = Notification::new(LOCATOR);
        trigger.sender.send(notification).await.unwrap();
        source.entered.notified().await;

        // Leadership moves away and the path is stopped mid-fetch
        cluster.on_view_change(GroupView::new(2, vec!["b".into(), "a".into()]));
        let stopping = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());

        source.release.notify_one();
        assert_eq!(ack.await.unwrap(), Acknowledgement::Done(IngestOutcome::NotLeader));
        stopping.await.unwrap();

        assert!(!pipeline.is_running().await);
        assert!(!dir.path().join("out.m3u8").exists());
    }
}
