//! Filesystem-backed stores for local use.
//!
//! Objects live under `{root}/objects/{key}`; records live in a JSON
//! manifest at `{root}/records.json`. Both are written to a temporary file
//! and renamed into place, so a reader never observes a half-written object
//! and `exists` implies the bytes fully landed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{check_key, object_url, ObjectStore, RecordStore};
use crate::error::StoreError;
use crate::types::{ImageRecord, NewImageRecord};

const OBJECTS_DIR: &str = "objects";
const MANIFEST_FILENAME: &str = "records.json";

/// Version of the record manifest format.
const MANIFEST_VERSION: u32 = 1;

/// Object store rooted at a local directory.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: &Path, public_base_url: &str) -> Self {
        Self {
            root: root.join(OBJECTS_DIR),
            public_base_url: public_base_url.to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        write_atomic(&path, &bytes).await?;
        tracing::debug!(key, content_type, size = bytes.len(), "Stored object");
        Ok(object_url(&self.public_base_url, key))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordManifest {
    version: u32,
    records: Vec<ImageRecord>,
}

/// Record store persisted as a JSON manifest.
///
/// All writes go through one mutex and rewrite the manifest, which is fine
/// for a single local process and keeps the `(owner, key)` check and the
/// insert atomic with respect to each other.
pub struct JsonRecordStore {
    path: PathBuf,
    records: Mutex<Vec<ImageRecord>>,
}

impl JsonRecordStore {
    /// Open (or start) the manifest under `root`.
    pub async fn open(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(MANIFEST_FILENAME);
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let manifest: RecordManifest = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
                if manifest.version != MANIFEST_VERSION {
                    return Err(StoreError::Corrupt(format!(
                        "{}: unsupported manifest version {}",
                        path.display(),
                        manifest.version
                    )));
                }
                manifest.records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Opened record store {:?} ({} records)", path, records.len());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &[ImageRecord]) -> Result<(), StoreError> {
        let manifest = RecordManifest {
            version: MANIFEST_VERSION,
            records: records.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn create_image_record(
        &self,
        fields: NewImageRecord,
    ) -> Result<ImageRecord, StoreError> {
        let mut records = self.records.lock().await;
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
        if let Err(e) = self.persist(&records).await {
            records.pop();
            return Err(e);
        }
        Ok(record)
    }

    async fn find_by_key(
        &self,
        key: &str,
        owner_id: &str,
    ) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.key == key && r.owner_id == owner_id)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}", Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
