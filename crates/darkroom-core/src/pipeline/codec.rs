//! Decoding, encoding and metadata extraction for image bytes.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{ImageMetadata, OutputFormat};

/// Result of decoding an image.
pub struct DecodedImage {
    /// The decoded image data
    pub image: DynamicImage,
    /// Detected image format
    pub format: ImageFormat,
}

/// Decode bytes, detecting the format from content.
pub fn decode(bytes: &[u8], max_dimension: u32) -> PipelineResult<DecodedImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode {
            message: format!("Cannot detect image format: {}", e),
        })?;
    let format = reader
        .format()
        .ok_or_else(|| PipelineError::UnsupportedFormat {
            format: "unknown".to_string(),
        })?;

    let image = reader.decode().map_err(|e| PipelineError::Decode {
        message: e.to_string(),
    })?;

    let (width, height) = image.dimensions();
    if width > max_dimension || height > max_dimension {
        return Err(PipelineError::ImageTooLarge {
            width,
            height,
            max_dim: max_dimension,
        });
    }

    Ok(DecodedImage { image, format })
}

/// Encode `image` as `format`.
///
/// `quality` drives the JPEG encoder. PNG is lossless and the WebP encoder
/// available here is lossless only, so both ignore it.
pub fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> PipelineResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        }
        OutputFormat::Png => {
            flatten_if_opaque(image).write_with_encoder(PngEncoder::new(&mut buffer))
        }
        OutputFormat::Webp => {
            flatten_if_opaque(image).write_with_encoder(WebPEncoder::new_lossless(&mut buffer))
        }
    };

    result.map_err(|e| PipelineError::Encode {
        format: format.to_string(),
        message: e.to_string(),
    })?;
    Ok(buffer.into_inner())
}

/// Read dimensions and format from encoded bytes without a full decode.
pub fn read_metadata(bytes: &[u8]) -> PipelineResult<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode {
            message: format!("Cannot detect image format: {}", e),
        })?;
    let format = reader
        .format()
        .map(format_to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let (width, height) = reader.into_dimensions().map_err(|e| PipelineError::Decode {
        message: e.to_string(),
    })?;

    Ok(ImageMetadata {
        width,
        height,
        format,
    })
}

/// Convert an ImageFormat to a string representation.
pub fn format_to_string(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        ImageFormat::Gif => "gif".to_string(),
        ImageFormat::Tiff => "tiff".to_string(),
        ImageFormat::Bmp => "bmp".to_string(),
        ImageFormat::Ico => "ico".to_string(),
        ImageFormat::Pnm => "pnm".to_string(),
        ImageFormat::Avif => "avif".to_string(),
        _ => "unknown".to_string(),
    }
}

/// RGBA when any pixel is translucent, RGB otherwise.
fn flatten_if_opaque(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        if rgba.pixels().any(|p| p[3] != u8::MAX) {
            return DynamicImage::ImageRgba8(rgba);
        }
    }
    DynamicImage::ImageRgb8(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        }))
    }

    #[test]
    fn test_format_to_string() {
        assert_eq!(format_to_string(ImageFormat::Jpeg), "jpeg");
        assert_eq!(format_to_string(ImageFormat::Png), "png");
        assert_eq!(format_to_string(ImageFormat::WebP), "webp");
    }

    #[test]
    fn test_encode_then_read_metadata() {
        let image = sample(64, 32);
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::Webp] {
            let bytes = encode(&image, format, 80).unwrap();
            let meta = read_metadata(&bytes).unwrap();
            assert_eq!((meta.width, meta.height), (64, 32));
            assert_eq!(meta.format, format.as_str());
        }
    }

    #[test]
    fn test_webp_output_is_riff() {
        let bytes = encode(&sample(8, 8), OutputFormat::Webp, 80).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_jpeg_quality_changes_size() {
        let image = sample(128, 128);
        let low = encode(&image, OutputFormat::Jpeg, 10).unwrap();
        let high = encode(&image, OutputFormat::Jpeg, 95).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_decode_detects_format_by_content() {
        let bytes = encode(&sample(10, 10), OutputFormat::Png, 80).unwrap();
        let decoded = decode(&bytes, 100).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!(decoded.image.dimensions(), (10, 10));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image", 100).err().unwrap();
        assert!(matches!(
            err,
            PipelineError::UnsupportedFormat { .. } | PipelineError::Decode { .. }
        ));
    }

    #[test]
    fn test_decode_enforces_max_dimension() {
        let bytes = encode(&sample(50, 20), OutputFormat::Png, 80).unwrap();
        let err = decode(&bytes, 40).err().unwrap();
        assert!(matches!(err, PipelineError::ImageTooLarge { width: 50, .. }));
    }

    #[test]
    fn test_translucent_png_keeps_alpha() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 100])));
        let bytes = encode(&image, OutputFormat::Png, 80).unwrap();
        let decoded = decode(&bytes, 100).unwrap();
        assert!(decoded.image.color().has_alpha());
    }
}
