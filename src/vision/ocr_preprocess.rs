//! Region preprocessing before OCR
//!
//! Label crops are usually small and unevenly lit. Every region is turned
//! into a contrast-stretched grayscale image, and dark regions are
//! additionally binarized with a local (adaptive) threshold.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

/// Linear contrast gain applied to every pixel
pub const CONTRAST_ALPHA: f32 = 1.35;
/// Brightness offset added after the gain
pub const CONTRAST_BETA: f32 = 8.0;
/// Mean intensity under which a region counts as dark
pub const DARK_MEAN_THRESHOLD: f32 = 85.0;
/// Neighbourhood size of the adaptive threshold
pub const ADAPTIVE_BLOCK_SIZE: u32 = 35;
/// Constant subtracted from the local mean
pub const ADAPTIVE_OFFSET: f32 = 11.0;

/// Prepare a region for OCR: grayscale, contrast stretch, and adaptive
/// binarization when the region is dark
pub fn prepare_roi(image: &DynamicImage) -> GrayImage {
    let mut gray = to_grayscale(image);
    apply_contrast(&mut gray, CONTRAST_ALPHA, CONTRAST_BETA);

    let mean = mean_intensity(&gray);
    if mean < DARK_MEAN_THRESHOLD {
        debug!(mean, "Dark region, applying adaptive threshold");
        gray = adaptive_threshold(&gray, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
    }

    gray
}

/// Convert to grayscale with ITU-R BT.601 luminance weights
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([gray.round().clamp(0.0, 255.0) as u8])
    })
}

/// `|alpha * v + beta|` saturated to the u8 range
pub fn apply_contrast(image: &mut GrayImage, alpha: f32, beta: f32) {
    for pixel in image.pixels_mut() {
        let adjusted = (pixel.0[0] as f32 * alpha + beta).abs().round();
        pixel.0[0] = adjusted.clamp(0.0, 255.0) as u8;
    }
}

/// Mean pixel intensity, 0 for an empty image
pub fn mean_intensity(image: &GrayImage) -> f32 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
    sum as f32 / count as f32
}

/// Gaussian-weighted adaptive threshold
///
/// A pixel becomes white when it is brighter than its Gaussian-weighted
/// neighbourhood mean minus `offset`, black otherwise.
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    // Sigma the way OpenCV derives it from an odd kernel size
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(image, sigma);

    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y).0[0] as f32;
        let threshold = local_mean.get_pixel(x, y).0[0] as f32 - offset;
        if value > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
