//! Image preprocessing for ONNX models
//!
//! Resizing, normalization and NCHW tensor conversion shared by the object
//! detector, the crop classifier and the OCR models.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

/// Per-channel normalization applied as `(pixel / 255 - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Plain 0-1 scaling (YOLO)
    pub const UNIT: Self = Self {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    /// ImageNet statistics (classifier, PaddleOCR detection)
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    /// Maps [0, 255] to [-1, 1] (PaddleOCR recognition)
    pub const SYMMETRIC: Self = Self {
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
    };
}

/// Convert an RGB image to a normalized NCHW tensor (batch size 1)
pub fn to_nchw(image: &RgbImage, norm: Normalization) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - norm.mean[c]) / norm.std[c];
        }
    }

    tensor
}

/// Geometry of a letterboxed image, used to map boxes back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from network input space back to source image space
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize into a `size` x `size` square, keeping aspect ratio and padding
/// the borders with gray (114) the way YOLO models were trained
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = size as f32 / w.max(h).max(1) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([114, 114, 114]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Resize so the longest side fits `max_side` and both sides are
/// multiples of 32 (text detection networks require it)
///
/// Returns the resized image and the (x, y) ratios from resized to source.
pub fn resize_to_multiple_of_32(image: &RgbImage, max_side: u32) -> (RgbImage, (f32, f32)) {
    let (w, h) = image.dimensions();
    let longest = w.max(h).max(1);
    let scale = if longest > max_side {
        max_side as f32 / longest as f32
    } else {
        1.0
    };

    let round32 = |v: f32| (((v / 32.0).round() as u32) * 32).max(32);
    let new_w = round32(w as f32 * scale);
    let new_h = round32(h as f32 * scale);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    (resized, (w as f32 / new_w as f32, h as f32 / new_h as f32))
}

/// Resize a text line to a fixed height, keeping aspect ratio up to
/// `max_width`, and right-pad it to a width of at least `min_width`
pub fn resize_for_recognition(image: &RgbImage, height: u32, min_width: u32, max_width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let ratio = w as f32 / h.max(1) as f32;
    let new_w = ((height as f32 * ratio).ceil() as u32).clamp(1, max_width);

    let resized = imageops::resize(image, new_w, height, FilterType::Triangle);
    if new_w >= min_width {
        return resized;
    }

    let mut canvas = RgbImage::new(min_width, height);
    imageops::replace(&mut canvas, &resized, 0, 0);
    canvas
}

/// Resize the shorter side to `resize_to`, then take a centered square crop
pub fn resize_and_center_crop(image: &RgbImage, resize_to: u32, crop: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = resize_to as f32 / w.min(h).max(1) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(crop);
    let new_h = ((h as f32 * scale).round() as u32).max(crop);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let x = (new_w - crop) / 2;
    let y = (new_h - crop) / 2;
    imageops::crop_imm(&resized, x, y, crop, crop).to_image()
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}
