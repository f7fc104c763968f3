//! Vision Layer
//!
//! Object detection, crop classification and text recognition over decoded
//! images. Every engine sits behind a trait so the pipelines can be driven
//! by the ONNX adapters in production and by fakes in tests:
//! - [`ObjectDetector`]: YOLOv8 via ONNX Runtime ([`YoloDetector`])
//! - [`TextRecognizer`]: PaddleOCR via ONNX Runtime ([`PaddleOcrEngine`])
//! - [`ImageClassifier`]: ImageNet-style classifier ([`OnnxClassifier`])

pub mod classifier;
pub mod detection;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod roi;
pub mod selection;

use image::{DynamicImage, GrayImage};
use serde::Serialize;
use thiserror::Error;

pub use classifier::{fuse_labels, FusionOutcome, OnnxClassifier};
pub use detection::YoloDetector;
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::PaddleOcrEngine;
pub use selection::{select_best, ScoredCandidate};

/// Errors raised by the vision engines
#[derive(Debug, Error)]
pub enum VisionError {
    /// Input bytes are not a decodable image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A model could not be loaded or is malformed
    #[error("Model error: {0}")]
    Model(String),

    /// Inference failed inside the runtime
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Output tensor did not have the expected layout
    #[error("Unexpected model output: {0}")]
    OutputShape(String),
}

/// Axis-aligned box in pixel coordinates (x1, y1) top-left, (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Area, zero for degenerate or inverted boxes
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Grow the box by `pad` pixels on every side and clamp it to the image
    ///
    /// Returns `(x, y, width, height)` in whole pixels; the result may be
    /// empty when the box lies outside the image.
    pub fn to_pixel_rect(&self, pad: u32, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
        let pad = pad as f32;
        let x1 = (self.x1.floor() - pad).clamp(0.0, img_width as f32) as u32;
        let y1 = (self.y1.floor() - pad).clamp(0.0, img_height as f32) as u32;
        let x2 = (self.x2.floor() + pad).clamp(0.0, img_width as f32) as u32;
        let y2 = (self.y2.floor() + pad).clamp(0.0, img_height as f32) as u32;

        (x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// Object found by the detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence (0.0 - 1.0)
    pub confidence: f32,
    pub class_id: usize,
    pub class_label: String,
}

/// Text fragment found by the OCR engine
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    /// Fragment location inside the recognised image
    pub bounds: BoundingBox,
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Top-1 prediction of an image classifier
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    /// Softmax probability (0.0 - 1.0)
    pub probability: f32,
}

/// Multi-box object detector
pub trait ObjectDetector: Send + Sync {
    /// Detect objects, returning candidates in detector order
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError>;
}

/// Text recognition engine
pub trait TextRecognizer: Send + Sync {
    /// Recognise text in a single-channel image, paragraphs merged
    fn read_text(&self, image: &GrayImage) -> Result<Vec<OcrLine>, VisionError>;
}

/// Single-label image classifier
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<Classification, VisionError>;
}
