//! Randomized image augmentation.
//!
//! Two call sites share this module: the training batcher applies the full
//! transform set to every training image, and the class balancer uses a
//! narrower set when synthesizing minority-class copies. Geometric transforms
//! go through a single inverse-mapped bilinear affine sampler with a neutral
//! gray fill for pixels that fall outside the source.

use image::{Rgb, RgbImage};
use rand::Rng;

/// Fill color for pixels mapped from outside the source image
const FILL: u8 = 128;

/// Bounds for the random transforms
#[derive(Debug, Clone)]
pub struct AugmentConfig {
    /// Random horizontal mirror
    pub flip: bool,
    /// Maximum rotation in degrees, drawn from [-max, max]
    pub max_rotation_degrees: f32,
    /// Zoom factor range, 1.0 = no zoom
    pub zoom_range: (f32, f32),
    /// Maximum translation as a fraction of the image side
    pub max_translation: f32,
    /// Brightness jitter: factor drawn from [1 - b, 1 + b]
    pub brightness_jitter: f32,
    /// Contrast factor range
    pub contrast_range: (f32, f32),
}

impl AugmentConfig {
    /// Full transform set applied to training batches.
    pub fn training() -> Self {
        Self {
            flip: true,
            max_rotation_degrees: 20.0,
            zoom_range: (0.85, 1.15),
            max_translation: 0.10,
            brightness_jitter: 0.12,
            contrast_range: (0.9, 1.1),
        }
    }

    /// Narrower set used when synthesizing minority-class copies.
    pub fn synthesis() -> Self {
        Self {
            flip: true,
            max_rotation_degrees: 12.0,
            zoom_range: (1.0, 1.0),
            max_translation: 0.0,
            brightness_jitter: 0.10,
            contrast_range: (0.85, 1.15),
        }
    }
}

/// Applies independently drawn random transforms to images.
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    /// Apply one random draw of the configured transforms.
    pub fn apply<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let cfg = &self.config;
        let mut out = img.clone();

        if cfg.flip && rng.gen_bool(0.5) {
            out = image::imageops::flip_horizontal(&out);
        }

        let angle = if cfg.max_rotation_degrees > 0.0 {
            rng.gen_range(-cfg.max_rotation_degrees..=cfg.max_rotation_degrees)
                .to_radians()
        } else {
            0.0
        };
        let zoom = if cfg.zoom_range.0 < cfg.zoom_range.1 {
            rng.gen_range(cfg.zoom_range.0..=cfg.zoom_range.1)
        } else {
            cfg.zoom_range.0
        };
        let max_shift = cfg.max_translation * out.width() as f32;
        let (tx, ty) = if max_shift > 0.0 {
            (
                rng.gen_range(-max_shift..=max_shift),
                rng.gen_range(-max_shift..=max_shift),
            )
        } else {
            (0.0, 0.0)
        };

        if angle != 0.0 || (zoom - 1.0).abs() > f32::EPSILON || tx != 0.0 || ty != 0.0 {
            out = affine_sample(&out, angle, zoom, tx, ty);
        }

        if cfg.brightness_jitter > 0.0 {
            let factor = rng.gen_range(1.0 - cfg.brightness_jitter..=1.0 + cfg.brightness_jitter);
            out = adjust_brightness(&out, factor);
        }
        if cfg.contrast_range.0 < cfg.contrast_range.1 {
            let factor = rng.gen_range(cfg.contrast_range.0..=cfg.contrast_range.1);
            out = adjust_contrast(&out, factor);
        }

        out
    }

    /// Synthesize a copy that is guaranteed to differ from the source.
    pub fn synthesize<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let mut out = self.apply(img, rng);
        if out == *img {
            out = adjust_brightness(&out, 1.04);
        }
        if out == *img {
            // Only reachable when every channel is saturated.
            out = adjust_brightness(&out, 0.96);
        }
        out
    }
}

/// Sample a rotated/zoomed/translated view of the source image.
///
/// Inverse mapping: every destination pixel is projected back into source
/// coordinates and bilinearly interpolated, with out-of-bounds pixels filled
/// with neutral gray.
pub fn affine_sample(src: &RgbImage, angle: f32, zoom: f32, tx: f32, ty: f32) -> RgbImage {
    let (width, height) = src.dimensions();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (sin, cos) = angle.sin_cos();
    let inv_zoom = 1.0 / zoom.max(f32::EPSILON);

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx - tx;
        let dy = y as f32 - cy - ty;
        // Inverse rotation and zoom about the center.
        let sx = (cos * dx + sin * dy) * inv_zoom + cx;
        let sy = (-sin * dx + cos * dy) * inv_zoom + cy;
        bilinear(src, sx, sy)
    })
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = src.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([FILL, FILL, FILL]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    map_pixels(img, |v| v * factor)
}

fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    map_pixels(img, |v| (v - 128.0) * factor + 128.0)
}

fn map_pixels(img: &RgbImage, f: impl Fn(f32) -> f32) -> RgbImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            pixel[c] = f(pixel[c] as f32).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
