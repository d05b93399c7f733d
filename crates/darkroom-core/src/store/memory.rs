//! In-process stores, used by tests and embedded setups.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{check_key, object_url, ObjectStore, RecordStore};
use crate::error::StoreError;
use crate::types::{ImageRecord, NewImageRecord};

/// Object store backed by a `HashMap`.
pub struct MemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<String, StoredObject>>,
}

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Drop an object, simulating lost or externally deleted data.
    pub async fn remove(&self, key: &str) -> bool {
        self.objects.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::ObjectNotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        check_key(key)?;
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(object_url(&self.base_url, key))
    }
}

/// Record store backed by a `Vec`, with the `(owner, key)` unique constraint.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<ImageRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a record by id, simulating an owner-initiated deletion.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<ImageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_image_record(
        &self,
        fields: NewImageRecord,
    ) -> Result<ImageRecord, StoreError> {
        let mut records = self.records.write().await;
        if records
            .iter()
            .any(|r| r.owner_id == fields.owner_id && r.key == fields.key)
        {
            return Err(StoreError::Conflict {
                owner_id: fields.owner_id,
                key: fields.key,
            });
        }
        let record = ImageRecord::from_new(fields);
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_key(
        &self,
        key: &str,
        owner_id: &str,
    ) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.key == key && r.owner_id == owner_id)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(owner: &str, key: &str) -> NewImageRecord {
        NewImageRecord {
            owner_id: owner.to_string(),
            key: key.to_string(),
            url: format!("memory://objects/{key}"),
            width: 4,
            height: 3,
            format: "png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_object_put_get_exists() {
        let store = MemoryObjectStore::default();
        assert!(!store.exists("uploads/a.png").await.unwrap());

        let url = store
            .put("uploads/a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://objects/uploads/a.png");
        assert!(store.exists("uploads/a.png").await.unwrap());
        assert_eq!(store.get("uploads/a.png").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            store.content_type("uploads/a.png").await.as_deref(),
            Some("image/png")
        );
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryObjectStore::default();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_unique_owner_key() {
        let store = MemoryRecordStore::new();
        store.create_image_record(fields("u1", "k")).await.unwrap();

        let err = store
            .create_image_record(fields("u1", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Same key under another owner is a different row.
        store.create_image_record(fields("u2", "k")).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_find_by_key_is_owner_scoped() {
        let store = MemoryRecordStore::new();
        let record = store.create_image_record(fields("u1", "k")).await.unwrap();

        assert_eq!(
            store.find_by_key("k", "u1").await.unwrap().map(|r| r.id),
            Some(record.id)
        );
        assert!(store.find_by_key("k", "u2").await.unwrap().is_none());
        assert_eq!(
            store.find_by_id(record.id).await.unwrap().map(|r| r.owner_id),
            Some("u1".to_string())
        );
    }
}
