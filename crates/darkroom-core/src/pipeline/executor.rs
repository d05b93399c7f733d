//! The pipeline executor: original bytes + spec → transformed bytes + metadata.
//!
//! The executor is a pure function of its inputs (plus the watermark asset on
//! disk). Workers and the synchronous path run exactly the same code, so a
//! result computed either way is interchangeable in the cache.

use image::DynamicImage;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use super::codec::{self, DecodedImage};
use super::ops;
use super::watermark::Watermark;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::spec::TransformSpec;
use crate::types::{ImageMetadata, OutputFormat};

/// Bytes and metadata produced by one pipeline run.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    /// Re-read from `bytes`, never carried over from the input
    pub metadata: ImageMetadata,
    pub format: OutputFormat,
}

/// Runs a [`TransformSpec`] against image bytes.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    max_dimension: u32,
    timeout: Duration,
    watermark: Watermark,
}

impl PipelineExecutor {
    pub fn new(config: &PipelineConfig, watermark_path: &Path) -> Self {
        Self {
            max_dimension: config.max_image_dimension,
            timeout: config.timeout(),
            watermark: Watermark::new(watermark_path, config),
        }
    }

    /// Run the pipeline on a blocking thread, bounded by the configured timeout.
    pub async fn execute(
        &self,
        original: Vec<u8>,
        spec: &TransformSpec,
    ) -> Result<TransformOutput, PipelineError> {
        let executor = self.clone();
        let spec = spec.clone();
        let result = timeout(self.timeout, async {
            tokio::task::spawn_blocking(move || executor.execute_sync(&original, &spec)).await
        })
        .await;

        match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => Err(PipelineError::Task(e.to_string())),
            Err(_) => Err(PipelineError::Timeout {
                stage: "transform".to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Run the pipeline on the current thread.
    ///
    /// Order is fixed: crop, resize, rotate, flip, flop, grayscale, sepia,
    /// output format, watermark.
    pub fn execute_sync(
        &self,
        original: &[u8],
        spec: &TransformSpec,
    ) -> Result<TransformOutput, PipelineError> {
        let DecodedImage { image, format } = codec::decode(original, self.max_dimension)?;
        tracing::debug!(
            "Decoded {}x{} {}",
            image.width(),
            image.height(),
            codec::format_to_string(format)
        );

        let image = self.apply_geometry(image, spec)?;
        let image = apply_filters(image, spec);

        let output_format = spec
            .format
            .or_else(|| OutputFormat::from_image_format(format))
            .unwrap_or(OutputFormat::Jpeg);

        let image = if spec.watermark {
            match self.watermark.load() {
                Some(asset) => self.watermark.apply(&image, &asset),
                None => image,
            }
        } else {
            image
        };

        // Single encode, after compositing.
        let bytes = codec::encode(&image, output_format, spec.quality())?;
        let metadata = codec::read_metadata(&bytes)?;

        Ok(TransformOutput {
            bytes,
            metadata,
            format: output_format,
        })
    }

    /// Crop, resize, rotate, flip, flop.
    ///
    /// Resize and rotation sizes are checked against `max_dimension` before
    /// anything is allocated.
    fn apply_geometry(
        &self,
        mut image: DynamicImage,
        spec: &TransformSpec,
    ) -> Result<DynamicImage, PipelineError> {
        if let Some(crop) = &spec.crop {
            image = ops::crop(&image, crop)?;
        }
        if let Some(resize) = &spec.resize {
            self.check_size(ops::resize_footprint(image.width(), image.height(), resize))?;
            image = ops::resize_cover(&image, resize);
        }
        if let Some(degrees) = spec.rotation() {
            self.check_size(ops::rotated_dimensions(image.width(), image.height(), degrees))?;
            image = ops::rotate(&image, degrees);
        }
        if spec.flip {
            image = ops::flip(&image);
        }
        if spec.flop {
            image = ops::flop(&image);
        }
        Ok(image)
    }

    fn check_size(&self, (width, height): (u64, u64)) -> Result<(), PipelineError> {
        let max = u64::from(self.max_dimension);
        if width > max || height > max {
            return Err(PipelineError::ImageTooLarge {
                width: u32::try_from(width).unwrap_or(u32::MAX),
                height: u32::try_from(height).unwrap_or(u32::MAX),
                max_dim: self.max_dimension,
            });
        }
        Ok(())
    }
}

fn apply_filters(mut image: DynamicImage, spec: &TransformSpec) -> DynamicImage {
    if spec.grayscale() {
        image = ops::grayscale(&image);
    }
    if spec.sepia() {
        image = ops::sepia(&image);
    }
    image
}
