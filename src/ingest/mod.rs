//! Ingestion Module
//!
//! The leader-only path: consume "check this resource" notifications,
//! fetch the artifact, detect change, and replicate.

mod ingestor;
mod pipeline;
mod s3;
mod trigger;

pub use ingestor::{IngestOutcome, Ingestor};
pub use pipeline::IngestionPipeline;
pub use s3::{object_key, S3ArtifactSource};
pub use trigger::HttpTriggerSource;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Result;

/// Result reported back to the notification source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Fully ingested (and replicated, if changed)
    Done(IngestOutcome),
    /// Ingestion failed; the source may redeliver
    Failed { reason: String, retryable: bool },
}

/// A single "check this resource" notification
#[derive(Debug)]
pub struct Notification {
    /// Where the artifact lives (e.g. an object URL)
    pub locator: String,
    ack: Option<oneshot::Sender<Acknowledgement>>,
}

impl Notification {
    /// Create a notification and the receiver its acknowledgement lands on
    pub fn new(locator: impl Into<String>) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (tx, rx) = oneshot::channel();
        let notification = Self {
            locator: locator.into(),
            ack: Some(tx),
        };
        (notification, rx)
    }

    /// Acknowledge after processing
    pub fn ack(mut self, ack: Acknowledgement) {
        if let Some(tx) = self.ack.take() {
            if tx.send(ack).is_err() {
                tracing::debug!("Acknowledgement for {} dropped: requester gone", self.locator);
            }
        }
    }
}

/// An open stream of notifications from a trigger source
pub struct TriggerSubscription {
    notifications: mpsc::Receiver<Notification>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl TriggerSubscription {
    /// Wrap a notification channel. `shutdown` is signalled on close and
    /// `worker` awaited, so the source is fully released afterwards.
    pub fn new(
        notifications: mpsc::Receiver<Notification>,
        shutdown: Option<oneshot::Sender<()>>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            notifications,
            shutdown,
            worker,
        }
    }

    /// Next notification, or `None` once the source is exhausted
    pub async fn next(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Stop consuming: queued notifications are failed back to the source
    pub async fn close(mut self) {
        self.notifications.close();
        while let Ok(pending) = self.notifications.try_recv() {
            pending.ack(Acknowledgement::Failed {
                reason: "ingestion stopped".into(),
                retryable: true,
            });
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Trigger source worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TriggerSubscription {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Source of ingestion notifications
#[async_trait::async_trait]
pub trait TriggerSource: Send + Sync {
    /// Start delivering notifications
    async fn open(&self) -> Result<TriggerSubscription>;
}

/// Remote store the artifact is fetched from
#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch the current artifact bytes.
    ///
    /// Fails with `Error::ExpiredCredential` when a credential refresh may help.
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;

    /// Replace the access credentials
    async fn refresh_credentials(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sources for tests

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// Serves artifacts from a map; can simulate expiring credentials
    #[derive(Default)]
    pub struct MemorySource {
        artifacts: Mutex<HashMap<String, Vec<u8>>>,
        /// Number of upcoming fetches that fail with an expired credential
        pub expire_next: AtomicUsize,
        pub fetches: AtomicUsize,
        pub refreshes: AtomicUsize,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, locator: &str, bytes: &[u8]) {
            self.artifacts.lock().unwrap().insert(locator.to_string(), bytes.to_vec());
        }
    }

    #[async_trait::async_trait]
    impl ArtifactSource for MemorySource {
        async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let expire = self
                .expire_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if expire {
                return Err(Error::ExpiredCredential(locator.to_string()));
            }
            self.artifacts
                .lock()
                .unwrap()
                .get(locator)
                .cloned()
                .ok_or_else(|| Error::Source(format!("NoSuchKey: {}", locator)))
        }

        async fn refresh_credentials(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Trigger source fed directly by the test through `sender`
    pub struct ChannelTrigger {
        pub sender: mpsc::Sender<Notification>,
        inbox: tokio::sync::Mutex<Option<mpsc::Receiver<Notification>>>,
        pub opens: AtomicUsize,
    }

    impl ChannelTrigger {
        pub fn new() -> Self {
            let (sender, rx) = mpsc::channel(16);
            Self {
                sender,
                inbox: tokio::sync::Mutex::new(Some(rx)),
                opens: AtomicUsize::new(0),
            }
        }

        /// Deliver a notification and wait for its acknowledgement
        pub async fn notify(&self, locator: &str) -> Acknowledgement {
            let (notification, ack) = Notification::new(locator);
            self.sender.send(notification).await.unwrap();
            ack.await.unwrap()
        }
    }

    #[async_trait::async_trait]
    impl TriggerSource for ChannelTrigger {
        async fn open(&self) -> Result<TriggerSubscription> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .inbox
                .lock()
                .await
                .take()
                .ok_or_else(|| Error::Network("trigger already consumed".into()))?;
            Ok(TriggerSubscription::new(rx, None, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_fails_queued_notifications() {
        let (tx, rx) = mpsc::channel(4);
        let subscription = TriggerSubscription::new(rx, None, None);

        let (notification, ack) = Notification::new("s3://streams/live.m3u8");
        tx.send(notification).await.unwrap();
        subscription.close().await;

        match ack.await.unwrap() {
            Acknowledgement::Failed { retryable, .. } => assert!(retryable),
            other => panic!("unexpected acknowledgement: {:?}", other),
        }
        assert!(tx.send(Notification::new("x").0).await.is_err());
    }
}
