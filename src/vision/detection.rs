//! YOLOv8 object detection
//!
//! Runs an exported YOLOv8 ONNX model and turns its raw `[1, 4 + C, N]`
//! output into class-labelled boxes in source image coordinates.

use anyhow::Result;
use image::DynamicImage;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::{letterbox, to_nchw, Letterbox, Normalization};
use super::{BoundingBox, Detection, ObjectDetector, VisionError};
use crate::config::DetectorConfig;

/// COCO class names in YOLOv8 output order
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Name of a class index, falling back to the index itself
pub fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| class_id.to_string())
}

/// YOLOv8 detector backed by ONNX Runtime
pub struct YoloDetector {
    session: OnnxSession,
    config: DetectorConfig,
}

impl YoloDetector {
    /// Load a detector from an ONNX file
    pub fn new(model_path: &Path, config: &DetectorConfig, intra_threads: usize) -> Result<Self> {
        let session = OnnxSession::new(model_path, intra_threads)?;
        Ok(Self {
            session,
            config: config.clone(),
        })
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        let start = Instant::now();
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let (boxed, geometry) = letterbox(&rgb, self.config.input_size);
        let input = to_nchw(&boxed, Normalization::UNIT);
        let (shape, data) = self.session.run(input)?;

        let candidates = decode_output(
            &shape,
            &data,
            &geometry,
            (width, height),
            self.config.confidence_threshold,
        )?;
        let mut detections = non_max_suppression(candidates, self.config.iou_threshold);
        detections.truncate(self.config.max_detections);

        debug!(
            count = detections.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Object detection complete"
        );
        Ok(detections)
    }
}

/// Parse a YOLOv8 output tensor of shape `[1, 4 + C, N]`
///
/// Each column holds `cx, cy, w, h` in letterboxed input space followed by
/// C class scores. Boxes are mapped back to the source image and clamped.
pub fn decode_output(
    shape: &[usize],
    data: &[f32],
    geometry: &Letterbox,
    image_size: (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<Detection>, VisionError> {
    let (channels, anchors) = match shape {
        [1, c, n] if *c > 4 => (*c, *n),
        _ => {
            return Err(VisionError::OutputShape(format!(
                "expected [1, 4 + classes, anchors], got {:?}",
                shape
            )))
        }
    };
    if data.len() < channels * anchors {
        return Err(VisionError::OutputShape(format!(
            "tensor holds {} values, shape needs {}",
            data.len(),
            channels * anchors
        )));
    }

    let (img_w, img_h) = (image_size.0 as f32, image_size.1 as f32);
    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];
    let mut detections = Vec::new();

    for i in 0..anchors {
        let (class_id, confidence) = (4..channels)
            .map(|c| (c - 4, at(c, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = geometry.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.unmap(cx + w / 2.0, cy + h / 2.0);

        detections.push(Detection {
            bbox: BoundingBox::new(
                x1.clamp(0.0, img_w),
                y1.clamp(0.0, img_h),
                x2.clamp(0.0, img_w),
                y2.clamp(0.0, img_h),
            ),
            confidence,
            class_id,
            class_label: class_name(class_id),
        });
    }

    Ok(detections)
}

/// Class-aware non-maximum suppression
///
/// Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
