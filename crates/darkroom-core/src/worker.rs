//! Background worker: consumes transformation jobs and persists results.
//!
//! Each delivery goes through
//! `Delivered → Processing → Completed | Failed-Retryable | Failed-Terminal`:
//!
//! - **Completed**: result stored and indexed (or already present), acked.
//! - **Failed-Retryable**: transient failure with attempts left; nacked with
//!   requeue after a backoff, so the broker redelivers it.
//! - **Failed-Terminal**: fatal failure or attempts exhausted; published to the
//!   dead-letter queue, then acked. If the dead-letter publish fails the job
//!   is requeued instead, so it is never dropped.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::cache::{CacheResolver, Resolution};
use crate::config::{Config, QueueConfig, RetryConfig, WorkerConfig};
use crate::error::{JobError, QueueError, StoreError};
use crate::pipeline::PipelineExecutor;
use crate::queue::{DeadLetter, Delivery, DeliveryStream, TaskQueue, TransformationJob};
use crate::retry::{jittered_backoff, with_store_retry};
use crate::store::{ObjectStore, RecordStore};
use crate::types::{ImageRecord, NewImageRecord};

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Result stored and indexed by this delivery.
    Completed(ImageRecord),
    /// A result already existed; acked without reprocessing.
    AlreadyDone(ImageRecord),
    /// Handed back to the broker for another attempt.
    Requeued,
    /// Published to the dead-letter queue and acked.
    DeadLettered,
}

/// A stored result, either produced now or found already in place.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Processed {
    Created(ImageRecord),
    Existing(ImageRecord),
}

impl Processed {
    pub(crate) fn into_record(self) -> ImageRecord {
        match self {
            Processed::Created(record) | Processed::Existing(record) => record,
        }
    }
}

/// Counters over a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub skipped: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::AlreadyDone(_) => self.skipped += 1,
            JobOutcome::Requeued => self.requeued += 1,
            JobOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// A long-lived queue consumer.
///
/// Cheap to clone; in-flight jobs each run on their own task with a clone.
#[derive(Clone)]
pub struct Worker {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    resolver: CacheResolver,
    executor: PipelineExecutor,
    queue_config: QueueConfig,
    config: WorkerConfig,
    store_retry: RetryConfig,
}

impl Worker {
    pub fn new(
        config: &Config,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let resolver =
            CacheResolver::new(objects.clone(), records.clone(), config.store_retry.clone());
        Self {
            objects,
            records,
            queue,
            resolver,
            executor: PipelineExecutor::new(&config.pipeline, &config.watermark_path()),
            queue_config: config.queue.clone(),
            config: config.worker.clone(),
            store_retry: config.store_retry.clone(),
        }
    }

    /// Consume until `shutdown` changes or its sender is dropped.
    ///
    /// In-flight jobs finish before this returns. A lost delivery stream is
    /// re-established with backoff; after `reconnect_attempts` consecutive
    /// failures the last error is returned.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<WorkerStats, QueueError> {
        self.run_loop(shutdown, None).await
    }

    /// Consume until no delivery has arrived for `idle` and nothing is in flight.
    pub async fn run_until_idle(&self, idle: Duration) -> Result<WorkerStats, QueueError> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run_loop(shutdown, Some(idle)).await
    }

    async fn run_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        idle: Option<Duration>,
    ) -> Result<WorkerStats, QueueError> {
        let mut stats = WorkerStats::default();
        let mut failures = 0u32;

        loop {
            let error = match self.connect().await {
                Ok(mut deliveries) => {
                    tracing::info!(
                        queue = %self.queue_config.name,
                        prefetch = self.queue_config.prefetch,
                        "Worker consuming"
                    );
                    let lost = self
                        .consume(&mut deliveries, &mut shutdown, idle, &mut stats, &mut failures)
                        .await;
                    if !lost {
                        tracing::info!(?stats, "Worker stopped");
                        return Ok(stats);
                    }
                    QueueError::Unavailable("delivery stream ended".to_string())
                }
                Err(QueueError::Closed) => {
                    tracing::info!(?stats, "Queue closed, worker stopping");
                    return Ok(stats);
                }
                Err(e) => e,
            };

            failures += 1;
            if failures > self.config.reconnect_attempts {
                tracing::error!("Giving up after {} reconnect attempts: {}", failures - 1, error);
                return Err(error);
            }
            let delay = jittered_backoff(failures - 1, self.config.reconnect_delay_ms);
            tracing::warn!(
                "Queue connection lost ({}), reconnecting in {:?} ({}/{})",
                error,
                delay,
                failures,
                self.config.reconnect_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(stats),
            }
        }
    }

    async fn connect(&self) -> Result<DeliveryStream, QueueError> {
        self.queue.declare_durable(&self.queue_config.name).await?;
        self.queue
            .declare_durable(&self.queue_config.dead_letter_name)
            .await?;
        self.queue
            .consume(&self.queue_config.name, self.queue_config.prefetch)
            .await
    }

    /// Pull deliveries until shutdown, idleness or the end of the stream.
    /// Returns `true` when the stream was lost.
    async fn consume(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
        idle: Option<Duration>,
        stats: &mut WorkerStats,
        failures: &mut u32,
    ) -> bool {
        let mut in_flight: JoinSet<JobOutcome> = JoinSet::new();

        let lost = loop {
            tokio::select! {
                _ = shutdown.changed() => break false,
                Some(joined) = in_flight.join_next() => record_joined(stats, joined),
                next = deliveries.next() => match next {
                    Some(delivery) => {
                        *failures = 0;
                        let worker = self.clone();
                        in_flight.spawn(async move { worker.handle(&delivery).await });
                    }
                    None => break true,
                },
                _ = tokio::time::sleep(idle.unwrap_or_default()),
                    if idle.is_some() && in_flight.is_empty() => break false,
            }
        };

        while let Some(joined) = in_flight.join_next().await {
            record_joined(stats, joined);
        }
        lost
    }

    /// Process one delivery and settle it with the broker.
    pub async fn handle(&self, delivery: &Delivery) -> JobOutcome {
        let mut job = match TransformationJob::from_payload(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                let err = JobError::Payload(e);
                tracing::error!(tag = delivery.tag, "{}", err);
                return self
                    .dead_letter(delivery, DeadLetter::new(&delivery.payload, &err))
                    .await;
            }
        };
        // The broker's count is authoritative; the payload was written before
        // any delivery happened.
        job.attempt = delivery.attempt;

        let span = tracing::info_span!(
            "job",
            job_id = %job.job_id,
            cache_key = %job.cache_key,
            attempt = job.attempt
        );
        self.handle_job(delivery, &job).instrument(span).await
    }

    async fn handle_job(&self, delivery: &Delivery, job: &TransformationJob) -> JobOutcome {
        match self.process(job).await {
            Ok(processed) => {
                let outcome = match processed {
                    Processed::Created(record) => {
                        tracing::info!(record_id = %record.id, "Transformation completed");
                        JobOutcome::Completed(record)
                    }
                    Processed::Existing(record) => {
                        tracing::info!(record_id = %record.id, "Result already present, skipping");
                        JobOutcome::AlreadyDone(record)
                    }
                };
                if let Err(e) = self.queue.ack(delivery).await {
                    tracing::warn!("Ack failed, job may be redelivered: {}", e);
                }
                outcome
            }
            Err(err) if err.is_retryable() && job.attempt < self.config.max_attempts => {
                let delay =
                    jittered_backoff(job.attempt.saturating_sub(1), self.config.retry_delay_ms);
                tracing::warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    job.attempt,
                    self.config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                if let Err(e) = self.queue.nack(delivery, true).await {
                    tracing::warn!("Nack failed, job will return on reconnect: {}", e);
                }
                JobOutcome::Requeued
            }
            Err(err) => {
                tracing::error!(
                    error_kind = err.kind(),
                    "Job failed permanently after {} attempt(s): {}",
                    job.attempt,
                    err
                );
                self.dead_letter(delivery, DeadLetter::for_job(job, &err))
                    .await
            }
        }
    }

    /// Fetch, transform, store, index. Shared with the synchronous path.
    pub(crate) async fn process(&self, job: &TransformationJob) -> Result<Processed, JobError> {
        let key = job.cache_key.as_str();

        // Duplicate deliveries and duplicate jobs for the same key end here.
        let existing = self
            .resolver
            .resolve(&job.cache_key, &job.owner_id)
            .await
            .map_err(|source| JobError::Fetch {
                key: key.to_string(),
                source,
            })?;
        if let Resolution::Found(record) = existing {
            return Ok(Processed::Existing(record));
        }

        let original = with_store_retry(&self.store_retry, "fetch original", || {
            self.objects.get(&job.original_key)
        })
        .await
        .map_err(|source| JobError::Fetch {
            key: job.original_key.clone(),
            source,
        })?;
        tracing::debug!(
            store = self.objects.name(),
            "Fetched {} bytes from {}",
            original.len(),
            job.original_key
        );

        let output = self.executor.execute(original, &job.transform_spec).await?;
        tracing::debug!(
            "Transformed to {}x{} {}",
            output.metadata.width,
            output.metadata.height,
            output.metadata.format
        );

        let persist = |source: StoreError| JobError::Persist {
            key: key.to_string(),
            source,
        };
        let url = with_store_retry(&self.store_retry, "store result", || {
            self.objects
                .put(key, output.bytes.clone(), output.format.content_type())
        })
        .await
        .map_err(persist)?;

        let fields = NewImageRecord {
            owner_id: job.owner_id.clone(),
            key: key.to_string(),
            url,
            width: output.metadata.width,
            height: output.metadata.height,
            format: output.metadata.format.clone(),
        };
        let created = with_store_retry(&self.store_retry, "create record", || {
            self.records.create_image_record(fields.clone())
        })
        .await;

        match created {
            Ok(record) => Ok(Processed::Created(record)),
            Err(StoreError::Conflict { .. }) => {
                // Another delivery indexed the same result first.
                let record = self
                    .records
                    .find_by_key(key, &job.owner_id)
                    .await
                    .map_err(persist)?;
                record.map(Processed::Existing).ok_or_else(|| {
                    persist(StoreError::Conflict {
                        owner_id: job.owner_id.clone(),
                        key: key.to_string(),
                    })
                })
            }
            Err(e) => Err(persist(e)),
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, letter: DeadLetter) -> JobOutcome {
        let published = match letter.to_payload() {
            Ok(payload) => {
                self.queue
                    .publish(&self.queue_config.dead_letter_name, payload, true)
                    .await
            }
            Err(e) => Err(QueueError::from(e)),
        };

        match published {
            Ok(()) => {
                tracing::warn!(
                    queue = %self.queue_config.dead_letter_name,
                    error_kind = %letter.error_kind,
                    "Job dead-lettered"
                );
                if let Err(e) = self.queue.ack(delivery).await {
                    tracing::warn!("Ack after dead-letter failed: {}", e);
                }
                JobOutcome::DeadLettered
            }
            Err(e) => {
                tracing::error!("Dead-letter publish failed, requeueing job: {}", e);
                if let Err(e) = self.queue.nack(delivery, true).await {
                    tracing::warn!("Nack failed, job will return on reconnect: {}", e);
                }
                JobOutcome::Requeued
            }
        }
    }
}

fn record_joined(stats: &mut WorkerStats, joined: Result<JobOutcome, JoinError>) {
    match joined {
        Ok(outcome) => stats.record(&outcome),
        Err(e) => tracing::error!("Job task panicked: {e}"),
    }
}
