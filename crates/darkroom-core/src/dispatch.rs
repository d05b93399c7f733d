//! The request path: cache hit, or enqueue and return immediately.
//!
//! Nothing here transforms pixels. A miss costs one cache lookup and one
//! publish; the caller gets an acceptance token and polls or retries later.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{CacheKey, CacheKeyDeriver, CacheResolver, Resolution};
use crate::config::RetryConfig;
use crate::error::{DispatchError, QueueError};
use crate::queue::{TaskQueue, TransformationJob};
use crate::retry::with_store_retry;
use crate::spec::TransformSpec;
use crate::store::RecordStore;
use crate::types::ImageRecord;

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A stored result already exists; nothing was enqueued.
    Hit(ImageRecord),
    /// A job was enqueued; its result will land under `expected_key`.
    Accepted { job_id: Uuid, expected_key: CacheKey },
}

/// Response body for an accepted request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Processing<'a> {
    pub status: &'static str,
    pub task_id: Uuid,
    pub expected_key: &'a CacheKey,
}

/// What an HTTP layer serializes for a dispatch outcome.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseBody<'a> {
    Record(&'a ImageRecord),
    Processing(Processing<'a>),
}

impl DispatchOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, DispatchOutcome::Hit(_))
    }

    /// `200` for a hit, `202` for accepted work.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchOutcome::Hit(_) => 200,
            DispatchOutcome::Accepted { .. } => 202,
        }
    }

    /// Value of the cache-status indicator.
    pub fn cache_status(&self) -> &'static str {
        match self {
            DispatchOutcome::Hit(_) => "hit",
            DispatchOutcome::Accepted { .. } => "miss",
        }
    }

    pub fn body(&self) -> ResponseBody<'_> {
        match self {
            DispatchOutcome::Hit(record) => ResponseBody::Record(record),
            DispatchOutcome::Accepted {
                job_id,
                expected_key,
            } => ResponseBody::Processing(Processing {
                status: "processing",
                task_id: *job_id,
                expected_key,
            }),
        }
    }
}

/// Decides hit vs miss and enqueues work on a miss.
#[derive(Clone)]
pub struct Dispatcher {
    deriver: CacheKeyDeriver,
    resolver: CacheResolver,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    queue_name: String,
    retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(
        deriver: CacheKeyDeriver,
        resolver: CacheResolver,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
        queue_name: &str,
        retry: RetryConfig,
    ) -> Self {
        Self {
            deriver,
            resolver,
            records,
            queue,
            queue_name: queue_name.to_string(),
            retry,
        }
    }

    /// The cache key `spec` would produce for `source`, after format fallback.
    pub fn expected_key(&self, source: &ImageRecord, spec: &TransformSpec) -> CacheKey {
        let spec = spec.clone().with_format_fallback(&source.format);
        self.deriver.derive(&source.id.to_string(), &spec)
    }

    /// Serve a cached result or enqueue a transformation of `source`.
    ///
    /// An enqueue failure is returned as [`DispatchError::Queue`]: when this
    /// returns an error, no work is in flight for the request.
    pub async fn dispatch(
        &self,
        source: &ImageRecord,
        spec: TransformSpec,
        owner_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if source.owner_id != owner_id {
            return Err(DispatchError::NotFound {
                image_id: source.id.to_string(),
            });
        }
        spec.validate()?;

        let spec = spec.with_format_fallback(&source.format);
        let cache_key = self.deriver.derive(&source.id.to_string(), &spec);

        if let Resolution::Found(record) = self.resolver.resolve(&cache_key, owner_id).await? {
            tracing::info!(cache_key = %cache_key, record_id = %record.id, "Cache hit");
            return Ok(DispatchOutcome::Hit(record));
        }

        let job = TransformationJob {
            job_id: Uuid::new_v4(),
            source_image_id: source.id,
            owner_id: owner_id.to_string(),
            original_key: source.key.clone(),
            transform_spec: spec,
            cache_key: cache_key.clone(),
            attempt: 0,
        };
        let payload = job.to_payload().map_err(QueueError::from)?;
        self.queue.publish(&self.queue_name, payload, true).await?;

        tracing::info!(
            job_id = %job.job_id,
            cache_key = %cache_key,
            "Cache miss, transformation enqueued"
        );
        Ok(DispatchOutcome::Accepted {
            job_id: job.job_id,
            expected_key: cache_key,
        })
    }

    /// Load the source record by id, then [`dispatch`](Self::dispatch).
    ///
    /// A missing record and one owned by someone else are indistinguishable
    /// to the caller.
    pub async fn dispatch_by_id(
        &self,
        image_id: Uuid,
        spec: TransformSpec,
        owner_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let source = self.find_owned(image_id, owner_id).await?;
        self.dispatch(&source, spec, owner_id).await
    }

    /// Owner-scoped record lookup.
    pub async fn find_owned(
        &self,
        image_id: Uuid,
        owner_id: &str,
    ) -> Result<ImageRecord, DispatchError> {
        let record = with_store_retry(&self.retry, "record lookup", || {
            self.records.find_by_id(image_id)
        })
        .await?;

        record
            .filter(|r| r.owner_id == owner_id)
            .ok_or_else(|| DispatchError::NotFound {
                image_id: image_id.to_string(),
            })
    }
}
