//! Object store and record store collaborators.
//!
//! The core only talks to storage through these two traits. Local
//! implementations are provided for the CLI ([`FsObjectStore`],
//! [`JsonRecordStore`]) and for tests ([`MemoryObjectStore`],
//! [`MemoryRecordStore`]).

mod fs;
mod memory;

pub use fs::{FsObjectStore, JsonRecordStore};
pub use memory::{MemoryObjectStore, MemoryRecordStore};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{ImageRecord, NewImageRecord};

/// Durable blob storage keyed by string path.
///
/// Uses `async_trait` because the stores are shared as `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &str;

    /// Whether bytes have landed under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Fetch the bytes under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store `bytes` under `key`, returning the resolvable URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, StoreError>;
}

/// Durable store of image records.
///
/// Implementations must reject a second record with the same
/// `(owner_id, key)` with [`StoreError::Conflict`]; the core relies on that
/// constraint rather than on cache keys being unique.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record.
    async fn create_image_record(&self, fields: NewImageRecord)
        -> Result<ImageRecord, StoreError>;

    /// Owner-scoped lookup by storage key.
    async fn find_by_key(&self, key: &str, owner_id: &str)
        -> Result<Option<ImageRecord>, StoreError>;

    /// Lookup by record id, regardless of owner.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError>;
}

/// Reject keys that could escape a store's namespace.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// `{base}/{key}` without doubled slashes.
pub(crate) fn object_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        assert!(check_key("uploads/1-a.jpg").is_ok());
        assert!(check_key("transformed/abc_0123.webp").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("/etc/passwd").is_err());
        assert!(check_key("uploads/../../x").is_err());
        assert!(check_key("uploads//x").is_err());
    }

    #[test]
    fn test_object_url() {
        assert_eq!(object_url("http://h/b/", "k/x.png"), "http://h/b/k/x.png");
        assert_eq!(object_url("http://h/b", "k/x.png"), "http://h/b/k/x.png");
    }
}
