//! Messages carried by the task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::error::JobError;
use crate::spec::TransformSpec;

/// One unit of transformation work.
///
/// Built by the dispatcher on a cache miss, owned by the broker until a
/// worker acknowledges it. The cache key is computed once at dispatch so a
/// worker never re-derives it with a different configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationJob {
    /// Returned to the client as the task id
    pub job_id: Uuid,
    pub source_image_id: Uuid,
    pub owner_id: String,
    pub original_key: String,
    pub transform_spec: TransformSpec,
    pub cache_key: CacheKey,
    /// Deliveries so far; 0 until a broker hands the job out
    #[serde(default)]
    pub attempt: u32,
}

impl TransformationJob {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// A job that will not be retried, with the reason it failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The job as delivered, or the raw payload when it did not parse
    pub job: serde_json::Value,
    pub error: String,
    pub error_kind: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(payload: &[u8], error: &JobError) -> Self {
        let job = serde_json::from_slice(payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
        });
        Self {
            job,
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            failed_at: Utc::now(),
        }
    }

    /// Dead letter for a job that parsed, recording its final attempt count.
    pub fn for_job(job: &TransformationJob, error: &JobError) -> Self {
        Self {
            job: serde_json::to_value(job).unwrap_or_default(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            failed_at: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn job() -> TransformationJob {
        TransformationJob {
            job_id: Uuid::nil(),
            source_image_id: Uuid::nil(),
            owner_id: "u1".to_string(),
            original_key: "uploads/1-a.jpg".to_string(),
            transform_spec: TransformSpec::from_json(r#"{"format":"webp"}"#).unwrap(),
            cache_key: serde_json::from_str("\"transformed/x_0123456789ab.webp\"").unwrap(),
            attempt: 0,
        }
    }

    #[test]
    fn test_job_payload_field_names() {
        let value: serde_json::Value = serde_json::from_slice(&job().to_payload().unwrap()).unwrap();
        for field in [
            "jobId",
            "sourceImageId",
            "ownerId",
            "originalKey",
            "transformSpec",
            "cacheKey",
            "attempt",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["transformSpec"]["format"], "webp");
        assert_eq!(value["cacheKey"], "transformed/x_0123456789ab.webp");
    }

    #[test]
    fn test_job_payload_parses_back() {
        let payload = job().to_payload().unwrap();
        assert_eq!(TransformationJob::from_payload(&payload).unwrap(), job());
    }

    #[test]
    fn test_dead_letter_keeps_job_and_reason() {
        let err = JobError::Pipeline(PipelineError::Decode {
            message: "bad bytes".into(),
        });
        let letter = DeadLetter::new(&job().to_payload().unwrap(), &err);
        assert_eq!(letter.error_kind, "pipeline");
        assert_eq!(letter.job["ownerId"], "u1");

        let value: serde_json::Value =
            serde_json::from_slice(&letter.to_payload().unwrap()).unwrap();
        assert!(value.get("errorKind").is_some());
        assert!(value.get("failedAt").is_some());
    }

    #[test]
    fn test_dead_letter_keeps_unparseable_payload() {
        let err = JobError::Payload(serde_json::from_str::<u8>("x").unwrap_err());
        let letter = DeadLetter::new(b"not json", &err);
        assert_eq!(letter.job, serde_json::Value::String("not json".into()));
        assert_eq!(letter.error_kind, "payload");
    }
}
