//! Image decoding and normalization.
//!
//! Every image entering the system, whether from the store during training or
//! from disk at inference time, goes through the same path: decode, validate,
//! resize to the model input size, and (at batch time) normalize to [-1, 1].

use image::imageops::FilterType;
use image::RgbImage;

use crate::utils::error::{MatStudioError, Result};

/// Images with a shorter side below this are rejected as too small to carry
/// usable texture for material classification.
pub const MIN_DIMENSION: u32 = 50;

/// Center/scale used for pixel normalization: (x - 127.5) / 127.5 -> [-1, 1].
pub const PIXEL_CENTER: f32 = 127.5;

/// Human-readable tag for the normalization convention, recorded in artifact
/// metadata so inference deployments can verify they match.
pub const PIXEL_NORMALIZATION: &str = "[-1,1]";

/// Decode raw image bytes, validate dimensions, and resize to a square.
pub fn decode_and_resize(bytes: &[u8], image_size: u32) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| MatStudioError::Dataset(format!("failed to decode image: {}", e)))?;

    let (width, height) = (img.width(), img.height());
    if width.min(height) < MIN_DIMENSION {
        return Err(MatStudioError::Dataset(format!(
            "image too small: {}x{} (minimum side {})",
            width, height, MIN_DIMENSION
        )));
    }

    Ok(img
        .resize_exact(image_size, image_size, FilterType::Lanczos3)
        .to_rgb8())
}

/// Convert an RGB image to a flat CHW float array normalized to [-1, 1].
pub fn to_chw_normalized(img: &RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let mut data = vec![0.0f32; 3 * height * width];

    for y in 0..height {
        for x in 0..width {
            let pixel = img.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                data[c * height * width + y * width + x] =
                    (pixel[c] as f32 - PIXEL_CENTER) / PIXEL_CENTER;
            }
        }
    }

    data
}
