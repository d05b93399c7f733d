//! Watermark compositing.
//!
//! The asset is managed by operators, not by requests: when it is missing or
//! unreadable the watermark step is skipped and the rest of the pipeline
//! proceeds.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;

/// Loads the watermark asset and composites it onto images.
#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
    width_ratio: f32,
    opacity: u8,
}

impl Watermark {
    pub fn new(path: &Path, config: &PipelineConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            width_ratio: config.watermark_width_ratio,
            opacity: config.watermark_opacity,
        }
    }

    /// Load the asset, or `None` if it is absent or cannot be decoded.
    ///
    /// Read on every use so operators can replace or remove the file
    /// without restarting workers.
    pub fn load(&self) -> Option<DynamicImage> {
        if !self.path.is_file() {
            tracing::debug!("Watermark asset {:?} not found, skipping", self.path);
            return None;
        }
        match image::open(&self.path) {
            Ok(asset) => Some(asset),
            Err(e) => {
                tracing::warn!("Watermark asset {:?} unreadable, skipping: {}", self.path, e);
                None
            }
        }
    }

    /// Composite the asset onto `base` at the bottom-right corner.
    ///
    /// The asset is scaled to `width_ratio` of the base width, converted to
    /// gray, its alpha multiplied by `opacity / 255`, then blended over.
    pub fn apply(&self, base: &DynamicImage, asset: &DynamicImage) -> DynamicImage {
        let mark = self.prepare(asset, base.width());
        let mut canvas = base.to_rgba8();
        let x = canvas.width() as i64 - mark.width() as i64;
        let y = canvas.height() as i64 - mark.height() as i64;
        imageops::overlay(&mut canvas, &mark, x, y);
        DynamicImage::ImageRgba8(canvas)
    }

    fn prepare(&self, asset: &DynamicImage, base_width: u32) -> RgbaImage {
        let (aw, ah) = asset.dimensions();
        let target_w = ((base_width as f32 * self.width_ratio).round() as u32).max(1);
        let target_h = ((ah as f64 * target_w as f64 / aw.max(1) as f64).round() as u32).max(1);

        let resized = asset.resize_exact(target_w, target_h, FilterType::Lanczos3);
        let mut mark = DynamicImage::ImageLumaA8(resized.to_luma_alpha8()).into_rgba8();

        // Keep the gray, scale alpha by the mask opacity.
        for pixel in mark.pixels_mut() {
            pixel[3] = ((pixel[3] as u16 * self.opacity as u16 + 127) / 255) as u8;
        }
        mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn test_missing_asset_loads_none() {
        let mark = Watermark::new(Path::new("/nonexistent/logo.png"), &config());
        assert!(mark.load().is_none());
    }

    #[test]
    fn test_unreadable_asset_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(Watermark::new(&path, &config()).load().is_none());
    }

    #[test]
    fn test_apply_bottom_right() {
        let base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255])));
        let asset =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 255])));
        let mark = Watermark::new(Path::new("unused"), &config());

        let out = mark.apply(&base, &asset).to_rgba8();
        assert_eq!(out.dimensions(), (200, 100));

        // 20% of 200 = 40px square in the corner, white at 77/255 over black.
        let corner = out.get_pixel(199, 99);
        assert!((75..=79).contains(&corner[0]), "corner {:?}", corner);
        assert_eq!(out.get_pixel(161, 61)[0], corner[0]);
        assert_eq!(out.get_pixel(159, 99)[0], 0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_apply_tall_asset_is_clipped() {
        let base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 10, Rgba([0, 0, 0, 255])));
        let asset =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 100, Rgba([255, 255, 255, 255])));
        let out = Watermark::new(Path::new("unused"), &config())
            .apply(&base, &asset)
            .to_rgba8();
        assert_eq!(out.dimensions(), (100, 10));
        assert!(out.get_pixel(99, 0)[0] > 0);
    }
}
