//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime: a DBNet text detector finds line
//! boxes, a CRNN recognizer reads each box with greedy CTC decoding, and
//! nearby lines are merged into paragraphs.

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::{resize_for_recognition, resize_to_multiple_of_32, to_nchw, Normalization};
use super::{BoundingBox, OcrLine, TextRecognizer, VisionError};
use crate::config::OcrConfig;

/// Boxes with a shorter side than this (in map pixels) are noise
const MIN_BOX_SIDE: f32 = 3.0;
/// Recognition crops are padded to at least this width
const REC_MIN_WIDTH: u32 = 320;

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcrEngine {
    detector: OnnxSession,
    recognizer: OnnxSession,
    charset: Vec<String>,
    config: OcrConfig,
}

impl PaddleOcrEngine {
    /// Load the detection and recognition models and the character dictionary
    pub fn new(
        det_model: &Path,
        rec_model: &Path,
        dictionary: &Path,
        config: &OcrConfig,
        intra_threads: usize,
    ) -> Result<Self> {
        let dict = std::fs::read_to_string(dictionary)
            .with_context(|| format!("Failed to read OCR dictionary {:?}", dictionary))?;

        Ok(Self {
            detector: OnnxSession::new(det_model, intra_threads)?,
            recognizer: OnnxSession::new(rec_model, intra_threads)?,
            charset: load_charset(&dict),
            config: config.clone(),
        })
    }

    /// Find text line boxes in image coordinates, in reading order
    fn detect_lines(&self, image: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        let rgb = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
        let (resized, (ratio_x, ratio_y)) = resize_to_multiple_of_32(&rgb, self.config.det_max_side);
        let (map_w, map_h) = resized.dimensions();

        let (shape, prob) = self.detector.run(to_nchw(&resized, Normalization::IMAGENET))?;
        if shape.len() != 4 || shape[2] * shape[3] != (map_w * map_h) as usize {
            return Err(VisionError::OutputShape(format!(
                "text detector returned {:?} for a {}x{} input",
                shape, map_w, map_h
            )));
        }

        let (img_w, img_h) = (image.width() as f32, image.height() as f32);
        let mut boxes: Vec<BoundingBox> = extract_text_boxes(
            &prob,
            map_w,
            map_h,
            self.config.det_threshold,
            self.config.box_threshold,
            self.config.unclip_ratio,
        )
        .into_iter()
        .map(|(b, _)| {
            BoundingBox::new(
                (b.x1 * ratio_x).clamp(0.0, img_w),
                (b.y1 * ratio_y).clamp(0.0, img_h),
                (b.x2 * ratio_x).clamp(0.0, img_w),
                (b.y2 * ratio_y).clamp(0.0, img_h),
            )
        })
        .filter(|b| b.width() >= 1.0 && b.height() >= 1.0)
        .collect();

        sort_reading_order(&mut boxes);
        Ok(boxes)
    }

    /// Recognise a single text line
    fn recognize_line(&self, image: &GrayImage, bounds: &BoundingBox) -> Result<(String, f32), VisionError> {
        let (x, y, w, h) = bounds.to_pixel_rect(0, image.width(), image.height());
        if w == 0 || h == 0 {
            return Ok((String::new(), 0.0));
        }

        let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
        let rgb = DynamicImage::ImageLuma8(crop).to_rgb8();
        let line = resize_for_recognition(&rgb, self.config.rec_height, REC_MIN_WIDTH, self.config.rec_max_width);

        let (shape, probs) = self.recognizer.run(to_nchw(&line, Normalization::SYMMETRIC))?;
        let (steps, classes) = match shape.as_slice() {
            [1, t, c] => (*t, *c),
            _ => {
                return Err(VisionError::OutputShape(format!(
                    "text recognizer returned {:?}, expected [1, steps, classes]",
                    shape
                )))
            }
        };

        Ok(ctc_greedy_decode(&probs, steps, classes, &self.charset))
    }
}

impl TextRecognizer for PaddleOcrEngine {
    fn read_text(&self, image: &GrayImage) -> Result<Vec<OcrLine>, VisionError> {
        let start = Instant::now();
        let boxes = self.detect_lines(image)?;

        let mut lines = Vec::with_capacity(boxes.len());
        for bounds in boxes {
            let (text, confidence) = self.recognize_line(image, &bounds)?;
            let text = text.trim().to_string();
            if !text.is_empty() {
                lines.push(OcrLine {
                    bounds,
                    text,
                    confidence,
                });
            }
        }

        let paragraphs = merge_paragraphs(
            lines,
            self.config.paragraph_x_ratio,
            self.config.paragraph_y_ratio,
        );

        debug!(
            paragraphs = paragraphs.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "OCR complete"
        );
        Ok(paragraphs)
    }
}

/// Character table for CTC decoding: one entry per dictionary line, plus
/// the space character PaddleOCR appends at the end
pub fn load_charset(dictionary: &str) -> Vec<String> {
    let mut charset: Vec<String> = dictionary
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    charset.push(" ".to_string());
    charset
}

/// Greedy CTC decoding of a `[steps, classes]` probability matrix
///
/// Class 0 is the blank; class `i` maps to `charset[i - 1]`. Repeated
/// classes collapse into one character. Returns the text and the mean
/// probability of the emitted characters.
pub fn ctc_greedy_decode(probs: &[f32], steps: usize, classes: usize, charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = 0usize;

    for step in probs.chunks_exact(classes.max(1)).take(steps) {
        let (index, probability) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if index != 0 && index != previous {
            if let Some(ch) = charset.get(index - 1) {
                text.push_str(ch);
                confidences.push(probability);
            }
        }
        previous = index;
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };
    (text, confidence)
}

/// Turn a text probability map into scored line boxes (map coordinates)
pub fn extract_text_boxes(
    prob: &[f32],
    width: u32,
    height: u32,
    det_threshold: f32,
    box_threshold: f32,
    unclip_ratio: f32,
) -> Vec<(BoundingBox, f32)> {
    let at = |x: u32, y: u32| prob[(y * width + x) as usize];
    let bitmap = GrayImage::from_fn(width, height, |x, y| {
        if at(x, y) > det_threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let mut boxes = Vec::new();
    for contour in find_contours::<i32>(&bitmap) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }

        let (mut x1, mut y1, mut x2, mut y2) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        for p in &contour.points {
            x1 = x1.min(p.x);
            y1 = y1.min(p.y);
            x2 = x2.max(p.x);
            y2 = y2.max(p.y);
        }

        let (w, h) = ((x2 - x1 + 1) as f32, (y2 - y1 + 1) as f32);
        if w.min(h) < MIN_BOX_SIDE {
            continue;
        }

        let mut sum = 0.0;
        for y in y1..=y2 {
            for x in x1..=x2 {
                sum += at(x as u32, y as u32);
            }
        }
        let score = sum / (w * h);
        if score < box_threshold {
            continue;
        }

        // Polygon offset distance for a rectangle: area * ratio / perimeter
        let d = w * h * unclip_ratio / (2.0 * (w + h));
        let expanded = BoundingBox::new(
            (x1 as f32 - d).max(0.0),
            (y1 as f32 - d).max(0.0),
            (x2 as f32 + 1.0 + d).min(width as f32),
            (y2 as f32 + 1.0 + d).min(height as f32),
        );
        boxes.push((expanded, score));
    }

    boxes
}

/// Sort boxes top to bottom, then left to right within a row
pub fn sort_reading_order(boxes: &mut [BoundingBox]) {
    boxes.sort_by(|a, b| a.y1.total_cmp(&b.y1));

    let mut start = 0;
    while start < boxes.len() {
        let anchor = boxes[start];
        let mut end = start + 1;
        while end < boxes.len()
            && (boxes[end].center().1 - anchor.center().1).abs() < anchor.height() / 2.0
        {
            end += 1;
        }
        boxes[start..end].sort_by(|a, b| a.x1.total_cmp(&b.x1));
        start = end;
    }
}

/// Merge nearby lines into paragraphs
///
/// Lines join a group when they lie within `x_ratio` (horizontally) and
/// `y_ratio` (vertically) times the group's mean line height. Each group
/// is read row by row, left to right, joined with spaces, and scored with
/// the mean confidence of its lines.
pub fn merge_paragraphs(lines: Vec<OcrLine>, x_ratio: f32, y_ratio: f32) -> Vec<OcrLine> {
    let mut group_of: Vec<Option<usize>> = vec![None; lines.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    while let Some(seed) = group_of.iter().position(Option::is_none) {
        let group_id = groups.len();
        group_of[seed] = Some(group_id);
        let mut members = vec![seed];

        loop {
            let mean_height = mean_line_height(&lines, &members);
            let extent = union_bounds(&lines, &members);
            let (min_x, max_x) = (extent.x1 - x_ratio * mean_height, extent.x2 + x_ratio * mean_height);
            let (min_y, max_y) = (extent.y1 - y_ratio * mean_height, extent.y2 + y_ratio * mean_height);

            let within = |lo: f32, hi: f32, v: f32| lo <= v && v <= hi;
            let next = (0..lines.len()).find(|&i| {
                let b = &lines[i].bounds;
                group_of[i].is_none()
                    && (within(min_x, max_x, b.x1) || within(min_x, max_x, b.x2))
                    && (within(min_y, max_y, b.y1) || within(min_y, max_y, b.y2))
            });

            match next {
                Some(i) => {
                    group_of[i] = Some(group_id);
                    members.push(i);
                }
                None => break,
            }
        }
        groups.push(members);
    }

    groups
        .into_iter()
        .map(|members| read_group(&lines, members))
        .collect()
}

fn mean_line_height(lines: &[OcrLine], members: &[usize]) -> f32 {
    members.iter().map(|&i| lines[i].bounds.height()).sum::<f32>() / members.len().max(1) as f32
}

fn union_bounds(lines: &[OcrLine], members: &[usize]) -> BoundingBox {
    members
        .iter()
        .map(|&i| lines[i].bounds)
        .reduce(|a, b| BoundingBox::new(a.x1.min(b.x1), a.y1.min(b.y1), a.x2.max(b.x2), a.y2.max(b.y2)))
        .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
}

fn read_group(lines: &[OcrLine], mut remaining: Vec<usize>) -> OcrLine {
    let mean_height = mean_line_height(lines, &remaining);
    let bounds = union_bounds(lines, &remaining);
    let confidence =
        remaining.iter().map(|&i| lines[i].confidence).sum::<f32>() / remaining.len().max(1) as f32;

    let mut words = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let top = remaining
            .iter()
            .map(|&i| lines[i].bounds.center().1)
            .fold(f32::MAX, f32::min);
        let pos = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &i)| lines[i].bounds.center().1 < top + 0.4 * mean_height)
            .min_by(|&(_, &a), &(_, &b)| lines[a].bounds.x1.total_cmp(&lines[b].bounds.x1))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let index = remaining.remove(pos);
        words.push(lines[index].text.as_str());
    }

    OcrLine {
        bounds,
        text: words.join(" "),
        confidence,
    }
}
