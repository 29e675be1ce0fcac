//! Result publishing
//!
//! Resources discovered by a job are forwarded as JSON to
//! `<results_subject>.<job id>`. The describe sink is synchronous, so it only
//! enqueues into a bounded queue; a forwarding task owns the actual publish
//! calls and reports the first failure back through the sink.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::resource::{sink_fn, Resource, Sink};

/// Publishes raw payloads to a subject
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Publisher backed by a core NATS connection
pub struct NatsResultPublisher {
    client: async_nats::Client,
}

impl NatsResultPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResultPublisher for NatsResultPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// A published message
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

impl PublishedMessage {
    pub fn resource(&self) -> Result<Resource> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// In-memory publisher that records what would have been sent
#[derive(Default)]
pub struct RecordingPublisher {
    published: RwLock<Vec<PublishedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}

/// Sink plus the task forwarding its resources to a publisher
///
/// The queue between them holds at most `capacity` resources. The first
/// failed publish stops the task; from then on the sink rejects every
/// resource with that failure.
pub struct Forwarder {
    pub sink: Sink,
    subject: String,
    failure: Arc<OnceLock<String>>,
    task: JoinHandle<usize>,
}

impl Forwarder {
    /// Start forwarding resources of one job to `subject`
    pub fn start(publisher: Arc<dyn ResultPublisher>, subject: String, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, Bytes)>(capacity.max(1));
        let failure = Arc::new(OnceLock::new());

        let task = tokio::spawn({
            let subject = subject.clone();
            let failure = failure.clone();
            async move {
                let mut published = 0;
                while let Some((resource_id, payload)) = rx.recv().await {
                    if let Err(e) = publisher.publish(subject.clone(), payload).await {
                        tracing::error!(
                            subject = %subject,
                            resource = %resource_id,
                            "Failed to publish resource: {:#}",
                            e
                        );
                        let _ = failure.set(format!("{:#}", e));
                        break;
                    }
                    published += 1;
                }
                published
            }
        });

        let sink = {
            let failure = failure.clone();
            sink_fn(move |resource: Resource| {
                if let Some(message) = failure.get() {
                    return Err(SinkError::new(&resource.id, message.as_str()));
                }
                let payload = serde_json::to_vec(&resource)
                    .map_err(|e| SinkError::new(&resource.id, e.to_string()))?;
                tx.try_send((resource.id, Bytes::from(payload)))
                    .map_err(|e| match e {
                        TrySendError::Full((id, _)) => SinkError::new(id, "result backlog full"),
                        TrySendError::Closed((id, _)) => SinkError::new(
                            id,
                            failure
                                .get()
                                .map(String::as_str)
                                .unwrap_or("result forwarder stopped"),
                        ),
                    })
            })
        };

        Self {
            sink,
            subject,
            failure,
            task,
        }
    }

    /// Wait for every queued resource to be handed to the publisher
    ///
    /// Returns how many were published, or the first publish failure. Every
    /// clone of the sink must be dropped before this resolves.
    pub async fn finish(self) -> Result<usize> {
        let Self {
            sink,
            subject,
            failure,
            task,
        } = self;
        drop(sink);

        let published = task
            .await
            .map_err(|e| anyhow!("Result forwarder for {} failed: {}", subject, e))?;
        match failure.get() {
            Some(message) => Err(anyhow!(
                "Failed to publish results to {} after {} resources: {}",
                subject,
                published,
                message
            )),
            None => Ok(published),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_forwarder_publishes_in_order() {
        let publisher = Arc::new(RecordingPublisher::new());
        let forwarder = Forwarder::start(publisher.clone(), "describe.results.job-1".to_string(), 16);

        (forwarder.sink)(Resource::new("1", "one", json!({ "n": 1 }))).unwrap();
        (forwarder.sink)(Resource::new("2", "two", json!({ "n": 2 }))).unwrap();
        assert_eq!(forwarder.finish().await.unwrap(), 2);

        let messages = publisher.messages_for_subject("describe.results.job-1");
        let ids: Vec<String> = messages
            .iter()
            .map(|m| m.resource().unwrap().id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_forwarder_with_nothing_to_send() {
        let publisher = Arc::new(RecordingPublisher::new());
        let forwarder = Forwarder::start(publisher.clone(), "describe.results.empty".to_string(), 16);
        assert_eq!(forwarder.finish().await.unwrap(), 0);
        assert!(publisher.published_messages().is_empty());
    }

    struct UnreachablePublisher;

    #[async_trait]
    impl ResultPublisher for UnreachablePublisher {
        async fn publish(&self, _subject: String, _payload: Bytes) -> Result<()> {
            anyhow::bail!("no responders")
        }
    }

    #[tokio::test]
    async fn test_publish_failure_fails_finish_and_sink() {
        let forwarder = Forwarder::start(
            Arc::new(UnreachablePublisher),
            "describe.results.job-2".to_string(),
            16,
        );
        let sink = forwarder.sink.clone();

        sink(Resource::new("1", "one", json!({}))).unwrap();
        // Let the forwarding task attempt the publish
        while forwarder.failure.get().is_none() {
            tokio::task::yield_now().await;
        }

        let err = sink(Resource::new("2", "two", json!({}))).unwrap_err();
        assert_eq!(err.resource_id, "2");
        assert!(err.message.contains("no responders"));

        drop(sink);
        let err = forwarder.finish().await.unwrap_err();
        assert!(format!("{:#}", err).contains("no responders"));
    }

    #[tokio::test]
    async fn test_full_backlog_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::new());
        let forwarder = Forwarder::start(publisher, "describe.results.job-3".to_string(), 1);

        (forwarder.sink)(Resource::new("1", "one", json!({}))).unwrap();
        let err = (forwarder.sink)(Resource::new("2", "two", json!({}))).unwrap_err();
        assert_eq!(err.message, "result backlog full");

        assert_eq!(forwarder.finish().await.unwrap(), 1);
    }
}
