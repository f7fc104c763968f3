//! Label scanner pipeline
//!
//! decode -> detect label regions -> OCR every region -> keep the best text
//! -> extract fields -> match catalog -> safety note -> aggregate confidence

use image::DynamicImage;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::analysis::confidence::{aggregate, round_to, Signals};
use crate::analysis::ocr_scoring::{score_lines, select_best};
use crate::analysis::{extract_fields, ExtractedFields, OcrResult};
use crate::storage::catalog::{Catalog, CatalogEntry};
use crate::storage::safety::SafetyTable;
use crate::vision::ocr_preprocess::prepare_roi;
use crate::vision::roi::{crop_with_padding, decode_image, png_base64};
use crate::vision::{ObjectDetector, TextRecognizer, VisionError};

/// Phase durations in seconds, rounded to milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub detector_sec: f64,
    pub ocr_sec: f64,
    pub total_sec: f64,
}

/// Debug artefacts returned with every scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugInfo {
    /// PNG of the region the winning text came from
    pub roi_png_b64: Option<String>,
}

/// Everything the scanner reports for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub ok: bool,
    /// Signal-based confidence in [0, 1], two decimals
    pub confidence: f64,
    pub fields: ExtractedFields,
    pub catalog_match: Option<CatalogEntry>,
    pub safety: Option<Value>,
    pub timings: Timings,
    pub debug: DebugInfo,
}

/// Scanner settings taken from the detector config
#[derive(Debug, Clone, Copy)]
pub struct ScannerOptions {
    /// Detections below this confidence are not read
    pub roi_confidence: f32,
    /// Pixels of context kept around each detection
    pub roi_padding: u32,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            roi_confidence: 0.3,
            roi_padding: 8,
        }
    }
}

/// Product label scanner over injected engines and lookup tables
pub struct LabelScanner {
    detector: Arc<dyn ObjectDetector>,
    ocr: Arc<dyn TextRecognizer>,
    catalog: Arc<Catalog>,
    safety: Arc<SafetyTable>,
    options: ScannerOptions,
}

impl LabelScanner {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        ocr: Arc<dyn TextRecognizer>,
        catalog: Arc<Catalog>,
        safety: Arc<SafetyTable>,
        options: ScannerOptions,
    ) -> Self {
        Self {
            detector,
            ocr,
            catalog,
            safety,
            options,
        }
    }

    /// Scan encoded image bytes
    ///
    /// With `use_detector` off the whole image is read as one region; with
    /// it on only confident detections are read.
    pub fn analyze_image(&self, bytes: &[u8], use_detector: bool) -> Result<AnalysisResult, VisionError> {
        let start = Instant::now();
        let image = decode_image(bytes)?;
        self.analyze_decoded(&image, use_detector, start)
    }

    fn analyze_decoded(
        &self,
        image: &DynamicImage,
        use_detector: bool,
        start: Instant,
    ) -> Result<AnalysisResult, VisionError> {
        // A detector miss leaves no regions and so no text
        let detector_start = Instant::now();
        let (rois, detector_elapsed) = if use_detector {
            let rois = self.detect_regions(image)?;
            (rois, detector_start.elapsed().as_secs_f64())
        } else {
            (vec![image.clone()], 0.0)
        };

        let ocr_start = Instant::now();
        let mut results = Vec::with_capacity(rois.len());
        for (index, roi) in rois.iter().enumerate() {
            let prepared = prepare_roi(roi);
            let lines = self.ocr.read_text(&prepared)?;
            let result = score_lines(&lines, index);
            debug!(
                roi = index,
                score = result.composite_score,
                text = %result.raw_text,
                "Scored region"
            );
            results.push(result);
        }
        let best = select_best(results);
        let ocr_elapsed = ocr_start.elapsed().as_secs_f64();

        let best_text = best.as_ref().map(|r| r.raw_text.as_str()).unwrap_or("");
        let roi_png_b64 = match &best {
            Some(OcrResult { source_roi, .. }) => Some(png_base64(&rois[*source_roi])?),
            None => None,
        };

        let fields = extract_fields(best_text);
        let catalog_match = self.catalog.match_name(fields.name.as_deref()).cloned();
        let safety_key = catalog_match
            .as_ref()
            .map(|entry| entry.name.as_str())
            .or(fields.name.as_deref())
            .unwrap_or("");
        let safety = self.safety.lookup(safety_key).cloned();

        let signals = Signals::from_scan(best_text, &fields, catalog_match.is_some());
        let confidence = round_to(aggregate(&signals) as f64, 2);

        let timings = Timings {
            detector_sec: round_to(detector_elapsed, 3),
            ocr_sec: round_to(ocr_elapsed, 3),
            total_sec: round_to(start.elapsed().as_secs_f64(), 3),
        };

        info!(
            regions = rois.len(),
            confidence,
            name = fields.name.as_deref().unwrap_or(""),
            matched = catalog_match.is_some(),
            "Label scanned"
        );

        Ok(AnalysisResult {
            ok: true,
            confidence,
            fields,
            catalog_match,
            safety,
            timings,
            debug: DebugInfo { roi_png_b64 },
        })
    }

    /// Padded crops of every confident detection, in detector order
    fn detect_regions(&self, image: &DynamicImage) -> Result<Vec<DynamicImage>, VisionError> {
        let detections = self.detector.detect(image)?;
        let rois: Vec<DynamicImage> = detections
            .iter()
            .filter(|d| d.confidence >= self.options.roi_confidence)
            .filter_map(|d| crop_with_padding(image, &d.bbox, self.options.roi_padding))
            .collect();
        debug!(
            detections = detections.len(),
            regions = rois.len(),
            "Label regions detected"
        );
        Ok(rois)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{BoundingBox, Detection, OcrLine};
    use image::{GrayImage, ImageFormat, Rgb, RgbImage};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::Cursor;

    struct FixedDetector(Vec<Detection>);

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
            Ok(self.0.clone())
        }
    }

    /// Returns scripted OCR output per call and records region sizes
    struct ScriptedOcr {
        responses: Mutex<Vec<Vec<OcrLine>>>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedOcr {
        fn new(responses: Vec<Vec<OcrLine>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for ScriptedOcr {
        fn read_text(&self, image: &GrayImage) -> Result<Vec<OcrLine>, VisionError> {
            self.seen.lock().push(image.dimensions());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    struct FailingOcr;

    impl TextRecognizer for FailingOcr {
        fn read_text(&self, _image: &GrayImage) -> Result<Vec<OcrLine>, VisionError> {
            Err(VisionError::Inference("ocr crashed".to_string()))
        }
    }

    fn line(text: &str, confidence: f32) -> OcrLine {
        OcrLine {
            bounds: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            text: text.to_string(),
            confidence,
        }
    }

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence,
            class_id: 39,
            class_label: "bottle".to_string(),
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 200, 200])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn catalog() -> Arc<Catalog> {
        let value = json!({
            "300450449108": {"name": "Tylenol Extra Strength Caplets", "dose": "2 caplets"}
        });
        let Value::Object(map) = value else { unreachable!() };
        Arc::new(Catalog::from_map(map).unwrap())
    }

    fn safety() -> Arc<SafetyTable> {
        let value = json!({
            "ibuprofen": {"warning": "NSAID"},
            "tylenol": {"max_daily": "3000 mg"}
        });
        let Value::Object(map) = value else { unreachable!() };
        Arc::new(SafetyTable::from_map(map))
    }

    fn scanner(detections: Vec<Detection>, ocr: Arc<dyn TextRecognizer>) -> LabelScanner {
        LabelScanner::new(
            Arc::new(FixedDetector(detections)),
            ocr,
            catalog(),
            safety(),
            ScannerOptions::default(),
        )
    }

    #[test]
    fn test_full_scan_with_catalog_and_safety() {
        let ocr = Arc::new(ScriptedOcr::new(vec![vec![
            line("TYLENOL EXTRA STRENGTH", 0.9),
            line("500 MG EXP 08/2026", 0.8),
        ]]));
        let scanner = scanner(vec![detection(10.0, 10.0, 90.0, 50.0, 0.8)], ocr.clone());

        let result = scanner.analyze_image(&png(100, 60), true).unwrap();

        assert!(result.ok);
        assert!(result.fields.name.as_deref().unwrap().starts_with("Tylenol Extra Strength"));
        assert_eq!(result.fields.variant.as_deref(), Some("500 Mg"));
        assert_eq!(result.fields.expiry_text.as_deref(), Some("08/2026"));

        let matched = result.catalog_match.as_ref().unwrap();
        assert_eq!(matched.id, "300450449108");
        assert_eq!(result.safety, Some(json!({"max_daily": "3000 mg"})));
        assert_eq!(result.confidence, 1.0);
        assert!(result.debug.roi_png_b64.is_some());

        // the detection was padded by 8 px before OCR
        assert_eq!(ocr.seen.lock().as_slice(), &[(96, 56)]);
    }

    #[test]
    fn test_best_region_wins() {
        let ocr = Arc::new(ScriptedOcr::new(vec![
            vec![],
            vec![line("ADVIL 200 MG", 0.7)],
            vec![line("AD", 0.9)],
        ]));
        let scanner = scanner(
            vec![
                detection(0.0, 0.0, 20.0, 20.0, 0.9),
                detection(30.0, 0.0, 60.0, 20.0, 0.9),
                detection(0.0, 30.0, 10.0, 40.0, 0.9),
            ],
            ocr.clone(),
        );

        let result = scanner.analyze_image(&png(80, 60), true).unwrap();
        assert_eq!(ocr.seen.lock().len(), 3);
        assert_eq!(result.fields.name.as_deref(), Some("Advil 200 Mg"));
        assert_eq!(result.fields.variant.as_deref(), Some("200 Mg"));
        assert!(result.catalog_match.is_none());
        // long text + name + variant
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn test_low_confidence_detections_are_skipped() {
        let ocr = Arc::new(ScriptedOcr::new(vec![]));
        let scanner = scanner(vec![detection(10.0, 10.0, 20.0, 20.0, 0.1)], ocr.clone());

        let result = scanner.analyze_image(&png(50, 40), true).unwrap();
        assert!(ocr.seen.lock().is_empty());
        assert!(result.fields.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(result.debug.roi_png_b64.is_none());
    }

    #[test]
    fn test_detector_miss_differs_from_ocr_only() {
        let ocr = Arc::new(ScriptedOcr::new(vec![vec![line("KLEENEX 3 PACK", 0.6)]]));
        let scanner = scanner(Vec::new(), ocr.clone());

        let missed = scanner.analyze_image(&png(32, 32), true).unwrap();
        assert!(ocr.seen.lock().is_empty());
        assert!(missed.fields.variant.is_none());

        let whole = scanner.analyze_image(&png(32, 32), false).unwrap();
        assert_eq!(ocr.seen.lock().as_slice(), &[(32, 32)]);
        assert_eq!(whole.fields.variant.as_deref(), Some("3 Pack"));
    }

    #[test]
    fn test_ocr_only_reads_whole_image() {
        let ocr = Arc::new(ScriptedOcr::new(vec![vec![line("KLEENEX 3 PACK", 0.6)]]));
        let scanner = scanner(vec![detection(0.0, 0.0, 5.0, 5.0, 0.9)], ocr.clone());

        let result = scanner.analyze_image(&png(64, 32), false).unwrap();
        assert_eq!(ocr.seen.lock().as_slice(), &[(64, 32)]);
        assert_eq!(result.timings.detector_sec, 0.0);
        assert_eq!(result.fields.variant.as_deref(), Some("3 Pack"));
    }

    #[test]
    fn test_nothing_recognised() {
        let scanner = scanner(Vec::new(), Arc::new(ScriptedOcr::new(vec![])));
        let result = scanner.analyze_image(&png(16, 16), true).unwrap();

        assert!(result.fields.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(result.catalog_match.is_none());
        assert!(result.safety.is_none());
    }

    #[test]
    fn test_invalid_image() {
        let scanner = scanner(Vec::new(), Arc::new(ScriptedOcr::new(vec![])));
        let err = scanner.analyze_image(b"nope", true).unwrap_err();
        assert!(matches!(err, VisionError::InvalidImage(_)));
    }

    #[test]
    fn test_ocr_failure_propagates() {
        let scanner = scanner(Vec::new(), Arc::new(FailingOcr));
        let err = scanner.analyze_image(&png(16, 16), false).unwrap_err();
        assert!(matches!(err, VisionError::Inference(_)));
    }

    #[test]
    fn test_result_json_shape() {
        let scanner = scanner(Vec::new(), Arc::new(ScriptedOcr::new(vec![])));
        let result = scanner.analyze_image(&png(16, 16), true).unwrap();
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["fields"], json!({"name": null, "variant": null, "expiry_text": null}));
        assert!(value["catalog_match"].is_null());
        assert!(value["timings"]["total_sec"].is_number());
        assert!(value["debug"]["roi_png_b64"].is_null());
    }
}
