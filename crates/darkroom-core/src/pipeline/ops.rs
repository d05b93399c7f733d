//! Individual pixel operations. The executor applies them in a fixed order;
//! each one is usable on its own.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::error::PipelineError;
use crate::spec::{Crop, Resize};

/// Sepia recombination matrix, rows are output R, G, B.
pub const SEPIA_MATRIX: [[f32; 3]; 3] = [
    [0.3588, 0.7044, 0.1355],
    [0.299, 0.587, 0.114],
    [0.2392, 0.4696, 0.091],
];

/// Canvas fill for areas uncovered by an arbitrary rotation.
const ROTATE_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Extract the crop region, failing if it does not lie inside the image.
pub fn crop(image: &DynamicImage, crop: &Crop) -> Result<DynamicImage, PipelineError> {
    let (width, height) = image.dimensions();
    let fits_x = crop.x.checked_add(crop.width).is_some_and(|r| r <= width);
    let fits_y = crop.y.checked_add(crop.height).is_some_and(|b| b <= height);
    if !fits_x || !fits_y {
        return Err(PipelineError::CropOutOfBounds {
            x: crop.x,
            y: crop.y,
            width: crop.width,
            height: crop.height,
            image_width: width,
            image_height: height,
        });
    }
    Ok(image.crop_imm(crop.x, crop.y, crop.width, crop.height))
}

/// Resize with "cover" semantics.
///
/// With both sides given, scale to fill the box and crop the overflow
/// (centered). With one side given, the other follows the aspect ratio.
pub fn resize_cover(image: &DynamicImage, resize: &Resize) -> DynamicImage {
    let (width, height) = image.dimensions();
    match (resize.width, resize.height) {
        (Some(w), Some(h)) => image.resize_to_fill(w, h, FilterType::Lanczos3),
        (Some(w), None) => {
            let h = scaled(height, w, width);
            image.resize_exact(w, h, FilterType::Lanczos3)
        }
        (None, Some(h)) => {
            let w = scaled(width, h, height);
            image.resize_exact(w, h, FilterType::Lanczos3)
        }
        (None, None) => image.clone(),
    }
}

/// Largest buffer [`resize_cover`] allocates for a `width`×`height` input.
///
/// With both sides given this is the scaled image before the overflow is
/// cropped away, which can be far larger than the target box.
pub fn resize_footprint(width: u32, height: u32, resize: &Resize) -> (u64, u64) {
    let (w, h) = (width.max(1) as f64, height.max(1) as f64);
    let (fw, fh) = match (resize.width, resize.height) {
        (Some(tw), Some(th)) => {
            let scale = (tw as f64 / w).max(th as f64 / h);
            ((w * scale).round().max(tw as f64), (h * scale).round().max(th as f64))
        }
        (Some(tw), None) => (tw as f64, (h * tw as f64 / w).round().max(1.0)),
        (None, Some(th)) => ((w * th as f64 / h).round().max(1.0), th as f64),
        (None, None) => (w, h),
    };
    (fw as u64, fh as u64)
}

/// Canvas size after rotating a `width`×`height` image clockwise by `degrees`.
pub fn rotated_dimensions(width: u32, height: u32, degrees: u32) -> (u64, u64) {
    match degrees % 360 {
        0 | 180 => (width as u64, height as u64),
        90 | 270 => (height as u64, width as u64),
        other => {
            let (w, h) = (width as f64, height as f64);
            let (sin, cos) = (other as f64).to_radians().sin_cos();
            // Shave float noise so e.g. 100.0000001 does not round up to 101.
            let out_w = ((w * cos.abs() + h * sin.abs()) - 1e-6).ceil().max(1.0);
            let out_h = ((w * sin.abs() + h * cos.abs()) - 1e-6).ceil().max(1.0);
            (out_w as u64, out_h as u64)
        }
    }
}

/// `value * num / den`, rounded, at least 1.
fn scaled(value: u32, num: u32, den: u32) -> u32 {
    let v = (value as f64 * num as f64 / den.max(1) as f64).round();
    (v as u32).max(1)
}

/// Rotate clockwise by `degrees` (expected in `0..360`).
///
/// Right angles are exact; any other angle grows the canvas to the rotated
/// bounding box and fills the corners with opaque black.
pub fn rotate(image: &DynamicImage, degrees: u32) -> DynamicImage {
    match degrees % 360 {
        0 => image.clone(),
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        other => DynamicImage::ImageRgba8(rotate_arbitrary(&image.to_rgba8(), other)),
    }
}

fn rotate_arbitrary(src: &RgbaImage, degrees: u32) -> RgbaImage {
    let (w, h) = (src.width() as f64, src.height() as f64);
    let (sin, cos) = (degrees as f64).to_radians().sin_cos();

    let (out_w, out_h) = rotated_dimensions(src.width(), src.height(), degrees);
    let out_w = u32::try_from(out_w).unwrap_or(u32::MAX);
    let out_h = u32::try_from(out_h).unwrap_or(u32::MAX);

    let (cx_src, cy_src) = (w / 2.0, h / 2.0);
    let (cx_dst, cy_dst) = (out_w as f64 / 2.0, out_h as f64 / 2.0);

    RgbaImage::from_fn(out_w, out_h, |ox, oy| {
        // Inverse-map the destination pixel center into the source.
        let dx = ox as f64 + 0.5 - cx_dst;
        let dy = oy as f64 + 0.5 - cy_dst;
        let sx = dx * cos + dy * sin + cx_src - 0.5;
        let sy = -dx * sin + dy * cos + cy_src - 0.5;
        sample_bilinear(src, sx, sy).unwrap_or(ROTATE_BACKGROUND)
    })
}

/// Bilinear sample at pixel-center coordinates; `None` outside the image.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    let (w, h) = (src.width() as f64, src.height() as f64);
    if x < -0.5 || y < -0.5 || x > w - 0.5 || y > h - 0.5 {
        return None;
    }
    let x = x.clamp(0.0, w - 1.0);
    let y = y.clamp(0.0, h - 1.0);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgba(out))
}

/// Mirror vertically (top becomes bottom).
pub fn flip(image: &DynamicImage) -> DynamicImage {
    image.flipv()
}

/// Mirror horizontally (left becomes right).
pub fn flop(image: &DynamicImage) -> DynamicImage {
    image.fliph()
}

/// Luma with alpha preserved, kept as RGBA so later color operations apply.
pub fn grayscale(image: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageLumaA8(image.to_luma_alpha8()).into_rgba8().into()
}

/// Apply [`SEPIA_MATRIX`] to every pixel's RGB, keeping alpha.
pub fn sepia(image: &DynamicImage) -> DynamicImage {
    recombine(image, &SEPIA_MATRIX)
}

/// Multiply each pixel's RGB by a 3×3 matrix, clamping to `0..=255`.
pub fn recombine(image: &DynamicImage, matrix: &[[f32; 3]; 3]) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (r, g, b) = (r as f32, g as f32, b as f32);
        let mut out = [0u8; 4];
        for (i, row) in matrix.iter().enumerate() {
            out[i] = (row[0] * r + row[1] * g + row[2] * b).round().clamp(0.0, 255.0) as u8;
        }
        out[3] = a;
        *pixel = Rgba(out);
    }
    DynamicImage::ImageRgba8(rgba)
}
