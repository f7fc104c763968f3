//! Crop classification and label fusion
//!
//! An ImageNet classifier can refine the detector's coarse COCO label for
//! the selected crop. The classifier is optional and best-effort: any
//! failure leaves the detector label in place.

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, warn};

use super::models::OnnxSession;
use super::preprocess::{resize_and_center_crop, softmax, to_nchw, Normalization};
use super::{Classification, ImageClassifier, VisionError};

/// Classifier probability at which its label always wins
pub const OVERRIDE_PROBABILITY: f32 = 0.65;
/// Detector confidence below which any classifier label wins
pub const WEAK_DETECTOR_CONFIDENCE: f32 = 0.45;

const RESIZE_TO: u32 = 232;
const CROP_SIZE: u32 = 224;

/// ImageNet classifier backed by ONNX Runtime
pub struct OnnxClassifier {
    session: OnnxSession,
    labels: Vec<String>,
}

impl OnnxClassifier {
    /// Load the model and its label list (one label per line)
    pub fn new(model_path: &Path, labels_path: &Path, intra_threads: usize) -> Result<Self> {
        let labels = std::fs::read_to_string(labels_path)
            .with_context(|| format!("Failed to read classifier labels {:?}", labels_path))?
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        let session = OnnxSession::new(model_path, intra_threads)?;
        Ok(Self { session, labels })
    }

    fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .filter(|label| !label.is_empty())
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<Classification, VisionError> {
        let crop = resize_and_center_crop(&image.to_rgb8(), RESIZE_TO, CROP_SIZE);
        let input = to_nchw(&crop, Normalization::IMAGENET);
        let (_, logits) = self.session.run(input)?;

        let probabilities = softmax(&logits);
        let (index, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            })
            .ok_or_else(|| VisionError::OutputShape("classifier returned no logits".to_string()))?;

        Ok(Classification {
            label: self.label(index),
            probability,
        })
    }
}

/// Result of running the classifier against a detector label
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FusionOutcome {
    /// No classifier is loaded
    Unavailable,
    /// Classifier ran but the detector label was kept
    Kept { label: String, probability: f32 },
    /// Classifier label replaced the detector label
    Overridden { label: String, probability: f32 },
    /// Classifier failed; detector label kept
    Degraded { reason: String },
}

impl FusionOutcome {
    /// Final label given the detector's label
    pub fn final_label(&self, detector_label: &str) -> String {
        match self {
            FusionOutcome::Overridden { label, .. } => label.clone(),
            _ => detector_label.to_string(),
        }
    }
}

/// Whether a classifier label should replace the detector label
pub fn should_override(probability: f32, detector_confidence: f32) -> bool {
    probability >= OVERRIDE_PROBABILITY || detector_confidence < WEAK_DETECTOR_CONFIDENCE
}

/// Run the optional classifier on a crop and decide which label wins
///
/// Never fails: errors and panics inside the classifier degrade to the
/// detector label.
pub fn fuse_labels(
    classifier: Option<&dyn ImageClassifier>,
    crop: &DynamicImage,
    detector_confidence: f32,
) -> FusionOutcome {
    let Some(classifier) = classifier else {
        return FusionOutcome::Unavailable;
    };

    let result = catch_unwind(AssertUnwindSafe(|| classifier.classify(crop)));
    let classification = match result {
        Ok(Ok(classification)) => classification,
        Ok(Err(e)) => {
            warn!("Classifier failed, keeping detector label: {}", e);
            return FusionOutcome::Degraded {
                reason: e.to_string(),
            };
        }
        Err(_) => {
            warn!("Classifier panicked, keeping detector label");
            return FusionOutcome::Degraded {
                reason: "classifier panicked".to_string(),
            };
        }
    };

    debug!(
        label = %classification.label,
        probability = classification.probability,
        detector_confidence,
        "Crop classified"
    );

    if should_override(classification.probability, detector_confidence) {
        FusionOutcome::Overridden {
            label: classification.label,
            probability: classification.probability,
        }
    } else {
        FusionOutcome::Kept {
            label: classification.label,
            probability: classification.probability,
        }
    }
}
