//! Cache resolution: does a usable result already exist for a key?

use std::sync::Arc;

use crate::cache::CacheKey;
use crate::config::RetryConfig;
use crate::error::StoreError;
use crate::retry::with_store_retry;
use crate::store::{ObjectStore, RecordStore};
use crate::types::ImageRecord;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Bytes are stored and indexed for this owner.
    Found(ImageRecord),
    /// No servable result; the caller should (re)process.
    Absent,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Two-step cache check: object store first, then the owner-scoped record.
///
/// The object store is authoritative for "have the bytes landed"; the record
/// store for "is the result indexed for this owner". Both must agree for a
/// hit. Anything else is reported as [`Resolution::Absent`] so the request
/// falls through to processing instead of serving a dangling reference.
#[derive(Clone)]
pub struct CacheResolver {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    retry: RetryConfig,
}

impl CacheResolver {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            objects,
            records,
            retry,
        }
    }

    /// Resolve `key` for `owner_id`. Transient store errors are retried
    /// before being surfaced.
    pub async fn resolve(&self, key: &CacheKey, owner_id: &str) -> Result<Resolution, StoreError> {
        let key_str = key.as_str();

        let stored = with_store_retry(&self.retry, "object exists", || {
            self.objects.exists(key_str)
        })
        .await?;

        if !stored {
            tracing::debug!(cache_key = key_str, "Cache miss: no object");
            return Ok(Resolution::Absent);
        }

        let record = with_store_retry(&self.retry, "record lookup", || {
            self.records.find_by_key(key_str, owner_id)
        })
        .await?;

        match record {
            Some(record) => {
                tracing::debug!(cache_key = key_str, record_id = %record.id, "Cache hit");
                Ok(Resolution::Found(record))
            }
            None => {
                tracing::warn!(
                    cache_key = key_str,
                    owner_id,
                    "Object stored without a record; treating as absent"
                );
                Ok(Resolution::Absent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, MemoryRecordStore};
    use crate::types::NewImageRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        resolver: CacheResolver,
    }

    fn fixture() -> Fixture {
        let objects = Arc::new(MemoryObjectStore::default());
        let records = Arc::new(MemoryRecordStore::new());
        let resolver = CacheResolver::new(
            objects.clone(),
            records.clone(),
            RetryConfig {
                attempts: 2,
                delay_ms: 1,
            },
        );
        Fixture {
            objects,
            records,
            resolver,
        }
    }

    fn key() -> CacheKey {
        serde_json::from_str("\"transformed/src_0123456789ab.webp\"").unwrap()
    }

    async fn index(records: &MemoryRecordStore, owner: &str) -> ImageRecord {
        records
            .create_image_record(NewImageRecord {
                owner_id: owner.to_string(),
                key: key().into_string(),
                url: "memory://objects/x".to_string(),
                width: 500,
                height: 400,
                format: "webp".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_absent_when_nothing_stored() {
        let f = fixture();
        assert_eq!(
            f.resolver.resolve(&key(), "u1").await.unwrap(),
            Resolution::Absent
        );
    }

    #[tokio::test]
    async fn test_found_when_object_and_record_exist() {
        let f = fixture();
        f.objects
            .put(key().as_str(), vec![1], "image/webp")
            .await
            .unwrap();
        let record = index(&f.records, "u1").await;

        assert_eq!(
            f.resolver.resolve(&key(), "u1").await.unwrap(),
            Resolution::Found(record)
        );
    }

    #[tokio::test]
    async fn test_object_without_record_is_absent() {
        let f = fixture();
        f.objects
            .put(key().as_str(), vec![1], "image/webp")
            .await
            .unwrap();

        assert_eq!(
            f.resolver.resolve(&key(), "u1").await.unwrap(),
            Resolution::Absent
        );
    }

    #[tokio::test]
    async fn test_record_without_object_is_absent() {
        let f = fixture();
        index(&f.records, "u1").await;

        assert_eq!(
            f.resolver.resolve(&key(), "u1").await.unwrap(),
            Resolution::Absent
        );
    }

    #[tokio::test]
    async fn test_other_owners_record_is_absent() {
        let f = fixture();
        f.objects
            .put(key().as_str(), vec![1], "image/webp")
            .await
            .unwrap();
        index(&f.records, "u1").await;

        assert!(!f.resolver.resolve(&key(), "u2").await.unwrap().is_found());
    }

    /// Object store that fails a fixed number of `exists` calls first.
    struct FlakyObjects {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for FlakyObjects {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            Ok(false)
        }
        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::ObjectNotFound(key.to_string()))
        }
        async fn put(&self, _: &str, _: Vec<u8>, _: &str) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("read only".into()))
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_surfaced() {
        let records = Arc::new(MemoryRecordStore::new());
        let policy = RetryConfig {
            attempts: 2,
            delay_ms: 1,
        };

        let recovers = CacheResolver::new(
            Arc::new(FlakyObjects {
                failures: AtomicU32::new(2),
            }),
            records.clone(),
            policy.clone(),
        );
        assert_eq!(
            recovers.resolve(&key(), "u1").await.unwrap(),
            Resolution::Absent
        );

        let exhausted = CacheResolver::new(
            Arc::new(FlakyObjects {
                failures: AtomicU32::new(10),
            }),
            records,
            policy,
        );
        assert!(matches!(
            exhausted.resolve(&key(), "u1").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
