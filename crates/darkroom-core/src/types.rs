//! Core data types shared by the stores, the dispatcher and the worker.

use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Output formats a transform can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    /// Canonical name, also used as the cache key extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    /// MIME type handed to the object store.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// Whether the encoder for this format honors a compression quality.
    /// PNG and the available WebP encoder are lossless.
    pub fn uses_quality(&self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }

    /// Map a detected input format onto an output format, if Darkroom can write it.
    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            ImageFormat::Png => Some(OutputFormat::Png),
            ImageFormat::WebP => Some(OutputFormat::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}

/// Dimensions and format read back from encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Detected format ("jpeg", "png", "webp", ...)
    pub format: String,
}

/// A persisted image row: either an upload or a transformation result.
///
/// Records are never mutated. A new transformation always produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: Uuid,
    pub owner_id: String,
    /// Object store key
    pub key: String,
    /// Resolvable URL returned by the object store
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Materialize a record from its fields, assigning identity and timestamp.
    pub fn from_new(fields: NewImageRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: fields.owner_id,
            key: fields.key,
            url: fields.url,
            width: fields.width,
            height: fields.height,
            format: fields.format,
            created_at: Utc::now(),
        }
    }
}

/// Fields for [`RecordStore::create_image_record`](crate::store::RecordStore::create_image_record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImageRecord {
    pub owner_id: String,
    pub key: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpg_is_alias_of_jpeg() {
        let format: OutputFormat = serde_json::from_str("\"jpg\"").unwrap();
        assert_eq!(format, OutputFormat::Jpeg);
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!(serde_json::to_string(&format).unwrap(), "\"jpeg\"");
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(serde_json::from_str::<OutputFormat>("\"gif\"").is_err());
        assert!("tiff".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_only_jpeg_uses_quality() {
        assert!(OutputFormat::Jpeg.uses_quality());
        assert!(!OutputFormat::Png.uses_quality());
        assert!(!OutputFormat::Webp.uses_quality());
    }

    #[test]
    fn test_from_image_format() {
        assert_eq!(
            OutputFormat::from_image_format(ImageFormat::WebP),
            Some(OutputFormat::Webp)
        );
        assert_eq!(OutputFormat::from_image_format(ImageFormat::Gif), None);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ImageRecord::from_new(NewImageRecord {
            owner_id: "user-1".into(),
            key: "uploads/1-a.jpg".into(),
            url: "http://localhost/uploads/1-a.jpg".into(),
            width: 10,
            height: 20,
            format: "jpeg".into(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ownerId"], "user-1");
        assert!(json.get("createdAt").is_some());
    }
}
