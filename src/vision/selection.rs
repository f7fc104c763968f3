//! Best-detection selection
//!
//! Raw top-confidence picking favours small spurious boxes over the subject
//! the camera is pointed at, so every candidate is re-scored with its area
//! share and its distance to the image center.

use serde::Serialize;

use super::Detection;

/// Weight of the normalized box area in the composite score
pub const AREA_WEIGHT: f32 = 0.30;
/// Weight of the centrality bonus in the composite score
pub const CENTER_WEIGHT: f32 = 0.15;

/// A detection with the derived terms of its composite score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub detection: Detection,
    /// Box area divided by image area (0.0 - 1.0)
    pub area_fraction: f32,
    /// Center offset normalized by half the image size, divided by sqrt(2)
    pub center_distance_norm: f32,
    pub composite_score: f32,
}

/// Score every detection against an image of `width` x `height` pixels
pub fn score_candidates(detections: &[Detection], width: u32, height: u32) -> Vec<ScoredCandidate> {
    let image_area = (width as f32 * height as f32).max(1.0);
    let half_w = (width as f32 / 2.0).max(f32::EPSILON);
    let half_h = (height as f32 / 2.0).max(f32::EPSILON);
    let (img_cx, img_cy) = (width as f32 / 2.0, height as f32 / 2.0);

    detections
        .iter()
        .map(|detection| {
            let area_fraction = (detection.bbox.area() / image_area).clamp(0.0, 1.0);

            let (cx, cy) = detection.bbox.center();
            let dx = (cx - img_cx) / half_w;
            let dy = (cy - img_cy) / half_h;
            let center_distance_norm = (dx * dx + dy * dy).sqrt() / std::f32::consts::SQRT_2;
            let center_bonus = 1.0 - center_distance_norm;

            let composite_score =
                detection.confidence + AREA_WEIGHT * area_fraction + CENTER_WEIGHT * center_bonus;

            ScoredCandidate {
                detection: detection.clone(),
                area_fraction,
                center_distance_norm,
                composite_score,
            }
        })
        .collect()
}

/// Pick the detection with the highest composite score
///
/// Returns `None` for an empty list. Ties keep the earliest candidate.
pub fn select_best(detections: &[Detection], width: u32, height: u32) -> Option<ScoredCandidate> {
    score_candidates(detections, width, height)
        .into_iter()
        .fold(None, |best: Option<ScoredCandidate>, candidate| match best {
            Some(current) if current.composite_score >= candidate.composite_score => Some(current),
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, label: &str) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence,
            class_id: 0,
            class_label: label.to_string(),
        }
    }

    #[test]
    fn test_empty_list_has_no_best() {
        assert!(select_best(&[], 640, 480).is_none());
    }

    #[test]
    fn test_large_centered_box_scores_about_1_32() {
        // 90% of a 1000x1000 image, centered
        let side = (0.9f32).sqrt() * 1000.0;
        let offset = (1000.0 - side) / 2.0;
        let d = det(offset, offset, offset + side, offset + side, 0.9, "bottle");

        let best = select_best(&[d], 1000, 1000).unwrap();
        assert!((best.area_fraction - 0.9).abs() < 1e-3);
        assert!(best.center_distance_norm.abs() < 1e-4);
        assert!((best.composite_score - 1.32).abs() < 1e-3, "{}", best.composite_score);
    }

    #[test]
    fn test_large_subject_beats_small_confident_corner_box() {
        let corner = det(0.0, 0.0, 20.0, 20.0, 0.92, "cup");
        let subject = det(100.0, 80.0, 540.0, 400.0, 0.80, "box");

        let best = select_best(&[corner, subject], 640, 480).unwrap();
        assert_eq!(best.detection.class_label, "box");
    }

    #[test]
    fn test_best_has_max_composite_score() {
        let detections = vec![
            det(10.0, 10.0, 100.0, 100.0, 0.5, "a"),
            det(200.0, 150.0, 440.0, 330.0, 0.6, "b"),
            det(0.0, 0.0, 640.0, 480.0, 0.3, "c"),
            det(600.0, 400.0, 640.0, 480.0, 0.95, "d"),
        ];

        let scored = score_candidates(&detections, 640, 480);
        let best = select_best(&detections, 640, 480).unwrap();
        assert!(scored.iter().all(|c| best.composite_score >= c.composite_score));
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let a = det(270.0, 190.0, 370.0, 290.0, 0.7, "first");
        let b = det(270.0, 190.0, 370.0, 290.0, 0.7, "second");

        let best = select_best(&[a, b], 640, 480).unwrap();
        assert_eq!(best.detection.class_label, "first");
    }

    #[test]
    fn test_zero_area_boxes_fall_back_to_confidence() {
        let a = det(320.0, 240.0, 320.0, 240.0, 0.4, "low");
        let b = det(320.0, 240.0, 320.0, 240.0, 0.6, "high");

        let best = select_best(&[a, b], 640, 480).unwrap();
        assert_eq!(best.detection.class_label, "high");
        assert_eq!(best.area_fraction, 0.0);
        assert!(best.composite_score.is_finite());
    }

    #[test]
    fn test_corner_center_distance_is_about_one() {
        let d = det(0.0, 0.0, 0.0, 0.0, 0.5, "corner");
        let scored = score_candidates(&[d], 640, 480);
        assert!((scored[0].center_distance_norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_sized_image_does_not_divide_by_zero() {
        let d = det(0.0, 0.0, 10.0, 10.0, 0.5, "x");
        let scored = score_candidates(&[d], 0, 0);
        assert!(scored[0].area_fraction <= 1.0);
        assert!(scored[0].composite_score.is_finite());
    }
}
