//! Error types for the Darkroom transformation core.
//!
//! Errors are organized by concern so that the request path and the worker
//! can each decide what to do with them: validation and not-found errors stop
//! a request before anything is enqueued, store and queue errors carry
//! whether they are transient, and pipeline errors are fatal unless they are
//! a timeout.

use thiserror::Error;

/// Top-level error type for Darkroom operations.
#[derive(Error, Debug)]
pub enum DarkroomError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed transform request
    #[error("Invalid transform: {0}")]
    Spec(#[from] SpecError),

    /// Pipeline execution errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Upload exceeds `storage.max_upload_bytes`
    #[error("Upload too large: {size} bytes > {max}")]
    UploadTooLarge { size: u64, max: u64 },

    /// Object or record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Task queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Request-path dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Synchronous transformation failures
    #[error("Transformation failed: {0}")]
    Job(#[from] JobError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// A transform request that cannot be turned into a [`TransformSpec`](crate::TransformSpec).
#[derive(Error, Debug)]
pub enum SpecError {
    /// A field is out of range or missing a required companion
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    /// The request body is not valid JSON for a transform
    #[error("malformed transform JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpecError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Pipeline executor errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input bytes could not be decoded as an image
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Output could not be encoded in the requested format
    #[error("Encode error ({format}): {message}")]
    Encode { format: String, message: String },

    /// Crop region extends past the source image
    #[error(
        "Crop {width}x{height}+{x}+{y} lies outside the {image_width}x{image_height} source"
    )]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Image dimensions exceed limit
    #[error("Image too large: {width}x{height} > {max_dim}")]
    ImageTooLarge { width: u32, height: u32, max_dim: u32 },

    /// Input format is not one Darkroom can read
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// The blocking task running the pipeline was cancelled or panicked
    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// Object store and record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// No object exists under the key
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Key is empty or escapes the store namespace
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// The `(owner, key)` pair is already indexed
    #[error("Record already exists for owner {owner_id} and key {key}")]
    Conflict { owner_id: String, key: String },

    /// Persisted record data could not be read back
    #[error("Corrupt record store: {0}")]
    Corrupt(String),

    /// Local filesystem errors
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Task queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker could not be reached
    #[error("Queue broker unavailable: {0}")]
    Unavailable(String),

    /// The connection handle was closed
    #[error("Queue connection closed")]
    Closed,

    /// Publish or consume against an undeclared queue
    #[error("Queue not declared: {0}")]
    UnknownQueue(String),

    /// Ack/nack for a delivery tag the broker does not hold
    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// Job payload could not be encoded or decoded
    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors on the client-facing request path.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Source image missing or owned by someone else
    #[error("Image not found: {image_id}")]
    NotFound { image_id: String },

    /// Transform request failed validation
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Cache lookup failed after retries
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Job could not be enqueued; no work is in flight
    #[error("Failed to enqueue transformation: {0}")]
    Queue(#[from] QueueError),
}

/// A failure while a worker processes one job.
///
/// The variant records which step failed; [`JobError::is_retryable`] decides
/// between redelivery and the dead-letter queue.
#[derive(Error, Debug)]
pub enum JobError {
    /// The delivery body is not a valid job
    #[error("Malformed job payload: {0}")]
    Payload(#[source] serde_json::Error),

    /// Original bytes could not be fetched
    #[error("Failed to fetch original {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The executor rejected or failed on the image
    #[error("Pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// Result bytes or the record could not be written
    #[error("Failed to persist {key}: {source}")]
    Persist {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl JobError {
    /// Transient failures are redelivered; everything else is dead-lettered
    /// immediately without spending retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Payload(_) => false,
            JobError::Fetch { source, .. } | JobError::Persist { source, .. } => {
                source.is_transient()
            }
            JobError::Pipeline(PipelineError::Timeout { .. }) => true,
            JobError::Pipeline(_) => false,
        }
    }

    /// Short machine-readable label recorded in dead-letter entries.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Payload(_) => "payload",
            JobError::Fetch { .. } => "fetch",
            JobError::Pipeline(_) => "pipeline",
            JobError::Persist { .. } => "persist",
        }
    }
}

/// Convenience type alias for Darkroom results.
pub type Result<T> = std::result::Result<T, DarkroomError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_transient() {
        assert!(StoreError::Unavailable("connection reset".into()).is_transient());
        assert!(!StoreError::ObjectNotFound("uploads/a.jpg".into()).is_transient());
        assert!(!StoreError::Conflict {
            owner_id: "u1".into(),
            key: "k".into()
        }
        .is_transient());
    }

    #[test]
    fn test_pipeline_timeout_is_retryable() {
        let err = JobError::Pipeline(PipelineError::Timeout {
            stage: "execute".into(),
            timeout_ms: 30_000,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_oversized_output_and_task_panic_are_fatal() {
        let too_large = JobError::Pipeline(PipelineError::ImageTooLarge {
            width: u32::MAX,
            height: u32::MAX,
            max_dim: 12_000,
        });
        let panicked = JobError::Pipeline(PipelineError::Task("task panicked".into()));
        assert!(!too_large.is_retryable());
        assert!(!panicked.is_retryable());
    }

    #[test]
    fn test_crop_out_of_bounds_is_fatal() {
        let err = JobError::Pipeline(PipelineError::CropOutOfBounds {
            x: 900,
            y: 0,
            width: 200,
            height: 100,
            image_width: 1000,
            image_height: 800,
        });
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "pipeline");
    }

    #[test]
    fn test_fetch_classification_follows_store_error() {
        let transient = JobError::Fetch {
            key: "uploads/a.jpg".into(),
            source: StoreError::Unavailable("timeout".into()),
        };
        let missing = JobError::Fetch {
            key: "uploads/a.jpg".into(),
            source: StoreError::ObjectNotFound("uploads/a.jpg".into()),
        };
        assert!(transient.is_retryable());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_crop_error_message() {
        let err = PipelineError::CropOutOfBounds {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
            image_width: 35,
            image_height: 50,
        };
        assert_eq!(
            err.to_string(),
            "Crop 30x40+10+20 lies outside the 35x50 source"
        );
    }
}
