//! Darkroom Core - image transformation cache and dispatch.
//!
//! Darkroom turns a transform request on a stored image into a deterministic
//! cache key, serves an existing result when one is stored, and otherwise
//! enqueues the work for a background worker that runs the pipeline.
//!
//! # Architecture
//!
//! ```text
//! request → CacheKeyDeriver → CacheResolver ─┬─ hit  → 200 + record
//!                                            └─ miss → TaskQueue → 202
//! TaskQueue → Worker → PipelineExecutor → ObjectStore + RecordStore → ack
//! ```
//!
//! Storage and the broker are collaborators behind traits ([`ObjectStore`],
//! [`RecordStore`], [`TaskQueue`]); local implementations are included.
//!
//! # Usage
//!
//! ```rust,ignore
//! use darkroom_core::{Config, Darkroom, TransformSpec};
//!
//! #[tokio::main]
//! async fn main() -> darkroom_core::Result<()> {
//!     let darkroom = Darkroom::open_local(Config::load()?).await?;
//!     let source = darkroom.upload("user-1", std::fs::read("photo.jpg")?, "photo.jpg").await?;
//!
//!     let spec = TransformSpec::from_json(r#"{"resize":{"width":500},"format":"webp"}"#)?;
//!     let outcome = darkroom.dispatch(&source, spec, "user-1").await?;
//!     println!("{} {}", outcome.status_code(), outcome.cache_status());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod spec;
pub mod store;
pub mod types;
pub mod worker;

pub use cache::{CacheKey, CacheKeyDeriver, CacheResolver, Resolution};
pub use config::Config;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{
    ConfigError, DarkroomError, DispatchError, JobError, PipelineError, PipelineResult,
    QueueError, Result, SpecError, StoreError,
};
pub use pipeline::{PipelineExecutor, TransformOutput};
pub use queue::{Delivery, MemoryQueue, TaskQueue, TransformationJob};
pub use spec::TransformSpec;
pub use store::{FsObjectStore, JsonRecordStore, MemoryObjectStore, MemoryRecordStore};
pub use store::{ObjectStore, RecordStore};
pub use types::{ImageMetadata, ImageRecord, NewImageRecord, OutputFormat};
pub use worker::{JobOutcome, Worker, WorkerStats};

use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::codec;
use crate::retry::with_store_retry;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Darkroom service handle - the main entry point.
///
/// Owns the collaborator handles and hands out the request-path
/// [`Dispatcher`] and background [`Worker`]s built on them.
pub struct Darkroom {
    config: Config,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Dispatcher,
    worker: Worker,
}

impl Darkroom {
    /// Create a Darkroom over the given collaborators, declaring the job and
    /// dead-letter queues.
    pub async fn new(
        config: Config,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Result<Self> {
        tracing::debug!("Initializing Darkroom v{}", VERSION);
        queue.declare_durable(&config.queue.name).await?;
        queue.declare_durable(&config.queue.dead_letter_name).await?;

        let resolver =
            CacheResolver::new(objects.clone(), records.clone(), config.store_retry.clone());
        let dispatcher = Dispatcher::new(
            CacheKeyDeriver::new(&config.cache),
            resolver,
            records.clone(),
            queue.clone(),
            &config.queue.name,
            config.store_retry.clone(),
        );
        let worker = Worker::new(&config, objects.clone(), records.clone(), queue.clone());

        Ok(Self {
            config,
            objects,
            records,
            queue,
            dispatcher,
            worker,
        })
    }

    /// Filesystem stores under `storage.root` and an in-process queue.
    pub async fn open_local(config: Config) -> Result<Self> {
        let root = config.storage_root();
        let objects = Arc::new(FsObjectStore::new(&root, &config.storage.public_base_url));
        let records = Arc::new(JsonRecordStore::open(&root).await?);
        let queue = Arc::new(MemoryQueue::new());
        Self::new(config, objects, records, queue).await
    }

    /// Get a reference to the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// A worker consuming from this instance's queue.
    pub fn worker(&self) -> Worker {
        self.worker.clone()
    }

    /// Store an original image and create its source record.
    ///
    /// The bytes are size-checked and fully decoded first, so oversized,
    /// truncated, or non-image uploads never reach storage. Dimensions and
    /// format come from the decoded image.
    pub async fn upload(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<ImageRecord> {
        let max_bytes = self.config.storage.max_upload_bytes;
        if bytes.len() as u64 > max_bytes {
            return Err(DarkroomError::UploadTooLarge {
                size: bytes.len() as u64,
                max: max_bytes,
            });
        }

        let max_dimension = self.config.pipeline.max_image_dimension;
        let (bytes, decoded) = tokio::task::spawn_blocking(move || {
            let decoded = codec::decode(&bytes, max_dimension);
            (bytes, decoded)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?;
        let decoded = decoded?;
        let metadata = ImageMetadata {
            width: decoded.image.width(),
            height: decoded.image.height(),
            format: codec::format_to_string(decoded.format),
        };

        // Unique per upload; a shared file name must not overwrite another object.
        let key = format!("uploads/{}-{}", Uuid::new_v4(), sanitize_file_name(file_name));
        let content_type = format!("image/{}", metadata.format);

        let url = with_store_retry(&self.config.store_retry, "store upload", || {
            self.objects.put(&key, bytes.clone(), &content_type)
        })
        .await?;

        let record = self
            .records
            .create_image_record(NewImageRecord {
                owner_id: owner_id.to_string(),
                key,
                url,
                width: metadata.width,
                height: metadata.height,
                format: metadata.format,
            })
            .await?;
        tracing::info!(record_id = %record.id, key = %record.key, "Uploaded source image");
        Ok(record)
    }

    /// Owner-scoped record lookup; another owner's record is not found.
    pub async fn image(&self, id: Uuid, owner_id: &str) -> Result<ImageRecord> {
        Ok(self.dispatcher.find_owned(id, owner_id).await?)
    }

    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch(
        &self,
        source: &ImageRecord,
        spec: TransformSpec,
        owner_id: &str,
    ) -> std::result::Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(source, spec, owner_id).await
    }

    /// See [`Dispatcher::dispatch_by_id`].
    pub async fn dispatch_by_id(
        &self,
        image_id: Uuid,
        spec: TransformSpec,
        owner_id: &str,
    ) -> std::result::Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch_by_id(image_id, spec, owner_id).await
    }

    /// The cache key a dispatch of `spec` on `source` would use.
    pub fn cache_key(&self, source: &ImageRecord, spec: &TransformSpec) -> CacheKey {
        self.dispatcher.expected_key(source, spec)
    }

    /// Run a transformation inline and persist it exactly as a worker would.
    ///
    /// Returns the existing record when the result is already stored.
    pub async fn transform_now(
        &self,
        source: &ImageRecord,
        spec: TransformSpec,
    ) -> Result<ImageRecord> {
        spec.validate()?;
        let spec = spec.with_format_fallback(&source.format);
        let job = TransformationJob {
            job_id: Uuid::new_v4(),
            source_image_id: source.id,
            owner_id: source.owner_id.clone(),
            original_key: source.key.clone(),
            cache_key: self.cache_key(source, &spec),
            transform_spec: spec,
            attempt: 1,
        };

        Ok(self.worker.process(&job).await?.into_record())
    }

    /// Close the queue connection. Running workers finish their current job
    /// and stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.close().await?;
        Ok(())
    }
}

/// Keep the final path segment of `name`, restricted to characters that are
/// safe in a storage key.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}
