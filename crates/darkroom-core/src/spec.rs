//! The transform request model.
//!
//! A [`TransformSpec`] is a closed structure: every operation is a named,
//! explicitly optional field, and [`TransformSpec::canonical`] is the single
//! routine that turns it into the bytes a cache key is hashed from. Nothing
//! else in the crate serializes a spec for hashing.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::error::SpecError;
use crate::types::OutputFormat;

/// Compression quality applied when a request names none.
pub const DEFAULT_QUALITY: u8 = 80;

/// Version prefix of the canonical form. Bump to invalidate every cache key.
const CANONICAL_VERSION: &str = "v1";

/// Region to extract from the source, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
}

/// Target box for a "cover" resize. A missing side follows the aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub grayscale: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sepia: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compress {
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

/// An ordered description of the operations requested on one image.
///
/// Field order here mirrors execution order, but the JSON representation is
/// order-independent: two bodies with the same fields in a different order
/// deserialize to equal specs and therefore the same cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,

    /// Clockwise rotation in degrees; any integer is accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate: Option<i32>,

    /// Mirror vertically
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flip: bool,

    /// Mirror horizontally
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flop: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<Compress>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub watermark: bool,
}

impl TransformSpec {
    /// Parse and validate a JSON transform body.
    pub fn from_json(body: &str) -> Result<Self, SpecError> {
        let spec: TransformSpec = serde_json::from_str(body)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check field ranges. Bounds against the actual image are the executor's job.
    pub fn validate(&self) -> Result<(), SpecError> {
        if let Some(crop) = &self.crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(SpecError::invalid(
                    "crop",
                    "width and height must be positive",
                ));
            }
        }
        if let Some(resize) = &self.resize {
            if resize.width.is_none() && resize.height.is_none() {
                return Err(SpecError::invalid(
                    "resize",
                    "at least one of width or height is required",
                ));
            }
            if resize.width == Some(0) || resize.height == Some(0) {
                return Err(SpecError::invalid(
                    "resize",
                    "width and height must be positive",
                ));
            }
        }
        if let Some(compress) = &self.compress {
            if !(1..=100).contains(&compress.quality) {
                return Err(SpecError::invalid(
                    "compress.quality",
                    format!("must be between 1 and 100, got {}", compress.quality),
                ));
            }
        }
        Ok(())
    }

    /// Effective compression quality after defaulting.
    pub fn quality(&self) -> u8 {
        self.compress
            .map(|c| c.quality)
            .unwrap_or(DEFAULT_QUALITY)
    }

    /// Rotation normalized to `0..360`; `None` when it is a no-op.
    pub fn rotation(&self) -> Option<u32> {
        self.rotate
            .map(|deg| deg.rem_euclid(360) as u32)
            .filter(|deg| *deg != 0)
    }

    pub fn grayscale(&self) -> bool {
        self.filters.is_some_and(|f| f.grayscale)
    }

    pub fn sepia(&self) -> bool {
        self.filters.is_some_and(|f| f.sepia)
    }

    /// Fill in the output format from the source image when the request names none.
    ///
    /// Sources in a format Darkroom cannot write fall back to jpeg. Applied
    /// before the cache key is derived so the key's extension always matches
    /// the bytes the executor will produce.
    pub fn with_format_fallback(mut self, source_format: &str) -> Self {
        if self.format.is_none() {
            self.format = Some(source_format.parse().unwrap_or(OutputFormat::Jpeg));
        }
        self
    }

    /// The format the cache key and the stored object carry.
    pub fn target_format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Jpeg)
    }

    /// The canonical form hashed into a cache key.
    ///
    /// Fields are written in execution order, each as `name:value` or a bare
    /// flag, joined by `|`. Absent fields and no-op values (rotation by a
    /// multiple of 360, false flags, zero crop offsets written explicitly)
    /// contribute exactly what their omitted form does. Quality is written
    /// after defaulting, so `{"compress":{"quality":80}}` and no `compress`
    /// at all are the same request. It is left out entirely for lossless
    /// targets, where it cannot change the output bytes.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(10);

        if let Some(c) = &self.crop {
            parts.push(format!("crop:{}x{}+{}+{}", c.width, c.height, c.x, c.y));
        }
        if let Some(r) = &self.resize {
            parts.push(format!(
                "resize:{}x{}",
                dim_or_auto(r.width),
                dim_or_auto(r.height)
            ));
        }
        if let Some(deg) = self.rotation() {
            parts.push(format!("rotate:{deg}"));
        }
        if self.flip {
            parts.push("flip".to_string());
        }
        if self.flop {
            parts.push("flop".to_string());
        }
        if self.grayscale() {
            parts.push("grayscale".to_string());
        }
        if self.sepia() {
            parts.push("sepia".to_string());
        }
        if let Some(format) = self.format {
            parts.push(format!("format:{format}"));
        }
        if self.target_format().uses_quality() {
            parts.push(format!("quality:{}", self.quality()));
        }
        if self.watermark {
            parts.push("watermark".to_string());
        }

        let mut out = String::from(CANONICAL_VERSION);
        for part in parts {
            let _ = write!(out, "|{part}");
        }
        out
    }
}

fn dim_or_auto(dim: Option<u32>) -> String {
    dim.map(|d| d.to_string()).unwrap_or_else(|| "auto".to_string())
}
