//! Job queue
//!
//! The worker pulls jobs through [`JobQueue`]. Production uses a durable
//! JetStream pull consumer; tests use [`MemoryQueue`].

use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, consumer::DeliverPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::context::TriggerType;

/// One pulled message awaiting acknowledgment
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    async fn ack(&mut self) -> Result<()>;
}

/// Source of job messages
#[async_trait]
pub trait JobQueue: Send {
    /// Next message, or `None` once the queue is closed
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>>;
}

/// Durable pull consumer on the job stream
pub struct JetStreamQueue {
    messages: pull::Stream,
}

impl JetStreamQueue {
    /// Bind to the durable consumer for `trigger`, creating stream and
    /// consumer when missing
    pub async fn connect(
        client: async_nats::Client,
        config: &Config,
        trigger: TriggerType,
    ) -> Result<Self> {
        let context = jetstream::new(client);
        let nats = &config.nats;

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: nats.stream.clone(),
                subjects: vec![nats.scheduled_subject.clone(), nats.manual_subject.clone()],
                max_age: Duration::from_secs(nats.max_age_secs),
                max_bytes: nats.max_bytes,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow!("Failed to open stream {}: {}", nats.stream, e))?;

        let name = config.consumer_name(trigger);
        let consumer = stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: config.subject_for(trigger).to_string(),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::All,
                    ack_wait: Duration::from_secs(nats.ack_wait_secs),
                    inactive_threshold: Duration::from_secs(nats.inactive_threshold_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to bind consumer {}: {}", name, e))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(1)
            .messages()
            .await
            .map_err(|e| anyhow!("Failed to start pulling from {}: {}", name, e))?;

        tracing::info!(
            stream = %nats.stream,
            consumer = %name,
            subject = %config.subject_for(trigger),
            "bound to job queue"
        );

        Ok(Self { messages })
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&mut self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("Failed to ack message: {}", e))
    }
}

#[async_trait]
impl JobQueue for JetStreamQueue {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        let next = self.messages.next().await?;
        Some(
            next.map(|message| Box::new(JetStreamDelivery { message }) as Box<dyn Delivery>)
                .map_err(|e| anyhow!("Failed to pull message: {}", e)),
        )
    }
}

/// In-memory queue with an acknowledgment log
///
/// `next` returns `None` once the queued payloads run out, unless the queue
/// was built with [`MemoryQueue::hold_open`], in which case it waits forever.
#[derive(Default)]
pub struct MemoryQueue {
    pending: VecDeque<Bytes>,
    acks: Arc<Mutex<Vec<usize>>>,
    delivered: usize,
    hold_open: bool,
}

impl MemoryQueue {
    pub fn new<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        Self {
            pending: payloads.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Delivery sequence numbers acked so far, in ack order
    pub fn acks(&self) -> Arc<Mutex<Vec<usize>>> {
        self.acks.clone()
    }
}

struct MemoryDelivery {
    seq: usize,
    payload: Bytes,
    acks: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&mut self) -> Result<()> {
        self.acks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.seq);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        match self.pending.pop_front() {
            Some(payload) => {
                self.delivered += 1;
                Some(Ok(Box::new(MemoryDelivery {
                    seq: self.delivered,
                    payload,
                    acks: self.acks.clone(),
                })))
            }
            None if self.hold_open => {
                futures::future::pending::<()>().await;
                None
            }
            None => None,
        }
    }
}
