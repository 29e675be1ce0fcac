//! Job consumer worker
//!
//! Pulls one job at a time, runs it against the orchestrator under the job's
//! own deadline, publishes what it finds and acknowledges the message exactly
//! once whatever the outcome. On shutdown the in-flight job is finished before
//! the loop returns.

pub mod job;
pub mod publisher;
pub mod queue;

pub use job::{CredentialDecryptor, Job, Plaintext};
pub use publisher::{NatsResultPublisher, RecordingPublisher, ResultPublisher};
pub use queue::{Delivery, JetStreamQueue, JobQueue, MemoryQueue};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::orchestrator::Orchestrator;
use crate::provider::Provider;
use publisher::Forwarder;

/// How one job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: String,
        published: usize,
        scope_errors: usize,
    },
    Failed {
        job_id: Option<String>,
        error: String,
    },
}

/// Counters for one run of the consume loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub failed: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed { .. } => self.completed += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

pub struct Worker<P: Provider> {
    id: Uuid,
    orchestrator: Arc<Orchestrator<P>>,
    publisher: Arc<dyn ResultPublisher>,
    decryptor: Arc<dyn CredentialDecryptor>,
    settings: WorkerConfig,
    /// Reused between jobs; shrunk back before every decode
    buffer: Vec<u8>,
}

impl<P: Provider> Worker<P> {
    pub fn new(
        orchestrator: Arc<Orchestrator<P>>,
        publisher: Arc<dyn ResultPublisher>,
        settings: WorkerConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            orchestrator,
            publisher,
            decryptor: Arc::new(Plaintext),
            settings,
            buffer: Vec::new(),
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consume `queue` until it closes or `shutdown` is cancelled
    ///
    /// Cancellation is only observed between jobs.
    pub async fn run<Q: JobQueue>(&mut self, queue: &mut Q, shutdown: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        tracing::info!(worker = %self.id, trigger = %self.settings.trigger, "worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(worker = %self.id, "shutdown requested, draining");
                    break;
                }
                next = queue.next() => next,
            };

            let Some(next) = next else {
                tracing::info!(worker = %self.id, "job queue closed");
                break;
            };

            let mut delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(worker = %self.id, "Failed to receive job: {:#}", e);
                    continue;
                }
            };

            let outcome = self.handle(delivery.payload()).await;
            stats.record(&outcome);

            if let Err(e) = delivery.ack().await {
                tracing::error!(worker = %self.id, "{:#}", e);
            }
        }

        tracing::info!(
            worker = %self.id,
            completed = stats.completed,
            failed = stats.failed,
            "worker stopped"
        );
        stats
    }

    /// Run one job; never fails, the outcome is logged and returned
    pub async fn handle(&mut self, payload: &[u8]) -> JobOutcome {
        self.buffer.clear();
        self.buffer.shrink_to(self.settings.retained_buffer_bytes);
        self.buffer.extend_from_slice(payload);

        let job = match Job::decode(&self.buffer) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker = %self.id, "Dropping job: {:#}", e);
                return JobOutcome::Failed {
                    job_id: None,
                    error: format!("{:#}", e),
                };
            }
        };

        let span = tracing::info_span!(
            "job",
            id = %job.id,
            resource_type = %job.resource_type,
            account = %job.account_id,
            trigger = %job.trigger_type,
        );
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: Job) -> JobOutcome {
        let failed = |error: String| JobOutcome::Failed {
            job_id: Some(job.id.clone()),
            error,
        };

        tracing::info!(
            queue_latency_ms = job.queue_latency(Utc::now()).num_milliseconds(),
            "processing job"
        );

        let request = match job.request(self.decryptor.as_ref()) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("{:#}", e);
                return failed(format!("{:#}", e));
            }
        };

        let cx = job.describe_context(Duration::from_secs(self.settings.job_timeout_secs));
        let forwarder = Forwarder::start(
            self.publisher.clone(),
            format!("{}.{}", self.settings.results_subject, job.id),
            self.settings.publish_backlog,
        );

        let result = self
            .orchestrator
            .get_resources(&cx, &request, Some(forwarder.sink.clone()))
            .await;
        let forwarded = forwarder.finish().await;

        if let Some(interrupt) = cx.interruption() {
            tracing::warn!("job interrupted: {}", interrupt);
        }

        let published = match (&result, forwarded) {
            (_, Ok(published)) => published,
            // The describe error already names the rejected resource
            (Err(_), Err(e)) => {
                tracing::warn!("{:#}", e);
                0
            }
            (Ok(_), Err(e)) => {
                tracing::error!("job failed: {:#}", e);
                return failed(format!("{:#}", e));
            }
        };

        match result {
            Ok(set) => {
                if set.has_errors() {
                    tracing::warn!(
                        published,
                        failed_scopes = set.errors.len(),
                        error_code = set.error_code.as_deref().unwrap_or(""),
                        "job finished with scope errors"
                    );
                } else {
                    tracing::info!(published, scopes = set.resources.len(), "job finished");
                }
                JobOutcome::Completed {
                    job_id: job.id.clone(),
                    published,
                    scope_errors: set.errors.len(),
                }
            }
            Err(e) => {
                tracing::error!(published, "job failed: {}", e);
                failed(e.to_string())
            }
        }
    }
}
