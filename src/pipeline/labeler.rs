//! Object labelling pipeline
//!
//! decode -> detect -> pick the best box -> optionally refine its label
//! with the crop classifier

use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::vision::roi::{crop_with_padding, decode_image};
use crate::vision::selection::select_best;
use crate::vision::{fuse_labels, FusionOutcome, ImageClassifier, ObjectDetector, ScoredCandidate, VisionError};

/// What the labeler found in one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelOutcome {
    /// Winning detection, `None` when nothing was detected
    pub best: Option<ScoredCandidate>,
    /// Final label after fusion
    pub label: Option<String>,
    pub fusion: FusionOutcome,
}

impl LabelOutcome {
    fn nothing_detected(fusion: FusionOutcome) -> Self {
        Self {
            best: None,
            label: None,
            fusion,
        }
    }
}

/// Names the main object in a photo
pub struct ObjectLabeler {
    detector: Arc<dyn ObjectDetector>,
    classifier: Option<Arc<dyn ImageClassifier>>,
}

impl ObjectLabeler {
    pub fn new(detector: Arc<dyn ObjectDetector>, classifier: Option<Arc<dyn ImageClassifier>>) -> Self {
        Self { detector, classifier }
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Label encoded image bytes
    pub fn identify(&self, bytes: &[u8]) -> Result<LabelOutcome, VisionError> {
        let image = decode_image(bytes)?;
        self.identify_image(&image)
    }

    /// Label a decoded image
    pub fn identify_image(&self, image: &DynamicImage) -> Result<LabelOutcome, VisionError> {
        let detections = self.detector.detect(image)?;
        let Some(best) = select_best(&detections, image.width(), image.height()) else {
            debug!("No objects detected");
            let fusion = if self.classifier.is_some() {
                FusionOutcome::Degraded {
                    reason: "nothing detected".to_string(),
                }
            } else {
                FusionOutcome::Unavailable
            };
            return Ok(LabelOutcome::nothing_detected(fusion));
        };

        let detector_label = best.detection.class_label.clone();
        let fusion = match crop_with_padding(image, &best.detection.bbox, 0) {
            Some(crop) => fuse_labels(
                self.classifier.as_deref(),
                &crop,
                best.detection.confidence,
            ),
            None if self.classifier.is_some() => FusionOutcome::Degraded {
                reason: "empty crop".to_string(),
            },
            None => FusionOutcome::Unavailable,
        };
        let label = fusion.final_label(&detector_label);

        info!(
            candidates = detections.len(),
            detector_label = %detector_label,
            label = %label,
            score = best.composite_score,
            "Object identified"
        );

        Ok(LabelOutcome {
            best: Some(best),
            label: Some(label),
            fusion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{BoundingBox, Classification, Detection};
    use image::RgbImage;

    struct FixedDetector(Vec<Detection>);

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
            Ok(self.0.clone())
        }
    }

    struct FixedClassifier(&'static str, f32);

    impl ImageClassifier for FixedClassifier {
        fn classify(&self, _image: &DynamicImage) -> Result<Classification, VisionError> {
            Ok(Classification {
                label: self.0.to_string(),
                probability: self.1,
            })
        }
    }

    fn det(bbox: BoundingBox, confidence: f32, label: &str) -> Detection {
        Detection {
            bbox,
            confidence,
            class_id: 0,
            class_label: label.to_string(),
        }
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(200, 100))
    }

    #[test]
    fn test_centered_large_box_beats_confident_corner_box() {
        let labeler = ObjectLabeler::new(
            Arc::new(FixedDetector(vec![
                det(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.80, "cell phone"),
                det(BoundingBox::new(40.0, 20.0, 160.0, 80.0), 0.70, "laptop"),
            ])),
            None,
        );

        let outcome = labeler.identify_image(&image()).unwrap();
        assert_eq!(outcome.label.as_deref(), Some("laptop"));
        assert_eq!(outcome.fusion, FusionOutcome::Unavailable);
    }

    #[test]
    fn test_classifier_refines_label() {
        let labeler = ObjectLabeler::new(
            Arc::new(FixedDetector(vec![det(
                BoundingBox::new(50.0, 20.0, 150.0, 80.0),
                0.9,
                "bottle",
            )])),
            Some(Arc::new(FixedClassifier("water bottle", 0.7))),
        );

        let outcome = labeler.identify_image(&image()).unwrap();
        assert_eq!(outcome.label.as_deref(), Some("water bottle"));
        assert!(matches!(outcome.fusion, FusionOutcome::Overridden { .. }));
    }

    #[test]
    fn test_nothing_detected() {
        let labeler = ObjectLabeler::new(Arc::new(FixedDetector(Vec::new())), None);
        let outcome = labeler.identify_image(&image()).unwrap();
        assert!(outcome.best.is_none());
        assert!(outcome.label.is_none());
    }

    #[test]
    fn test_box_outside_image_keeps_detector_label() {
        let labeler = ObjectLabeler::new(
            Arc::new(FixedDetector(vec![det(
                BoundingBox::new(500.0, 500.0, 600.0, 600.0),
                0.2,
                "kite",
            )])),
            Some(Arc::new(FixedClassifier("umbrella", 0.99))),
        );

        let outcome = labeler.identify_image(&image()).unwrap();
        assert_eq!(outcome.label.as_deref(), Some("kite"));
        assert!(matches!(outcome.fusion, FusionOutcome::Degraded { .. }));
    }

    #[test]
    fn test_identify_rejects_bad_bytes() {
        let labeler = ObjectLabeler::new(Arc::new(FixedDetector(Vec::new())), None);
        assert!(matches!(
            labeler.identify(b"garbage"),
            Err(VisionError::InvalidImage(_))
        ));
    }
}
