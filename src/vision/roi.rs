//! Image decoding and region extraction
//!
//! Uploaded bytes are decoded once; regions of interest are cropped out of
//! the decoded image and can be re-encoded as PNG for debugging.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use super::{BoundingBox, VisionError};

/// Decode an uploaded image (any format the `image` crate recognises)
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VisionError> {
    if bytes.is_empty() {
        return Err(VisionError::InvalidImage("empty upload".to_string()));
    }
    let image = image::load_from_memory(bytes).map_err(|e| VisionError::InvalidImage(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(VisionError::InvalidImage("image has no pixels".to_string()));
    }
    Ok(image)
}

/// Decode base64 text, tolerating a `data:image/...;base64,` prefix
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, VisionError> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| VisionError::InvalidImage(format!("invalid base64: {}", e)))
}

/// Crop a box grown by `pad` pixels, clamped to the image
///
/// Returns `None` when nothing of the box lies inside the image.
pub fn crop_with_padding(image: &DynamicImage, bbox: &BoundingBox, pad: u32) -> Option<DynamicImage> {
    let (x, y, w, h) = bbox.to_pixel_rect(pad, image.width(), image.height());
    if w == 0 || h == 0 {
        return None;
    }
    Some(image.crop_imm(x, y, w, h))
}

/// Encode an image as base64 PNG
pub fn png_base64(image: &DynamicImage) -> Result<String, VisionError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| VisionError::InvalidImage(format!("PNG encoding failed: {}", e)))?;
    Ok(STANDARD.encode(buffer.into_inner()))
}
