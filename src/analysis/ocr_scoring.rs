//! OCR result scoring
//!
//! Each region of interest is read independently; the region whose text is
//! longest and most confidently recognised wins.

use serde::Serialize;

use crate::vision::OcrLine;

/// Characters of text worth one point of score
pub const CHARS_PER_POINT: f32 = 40.0;

/// Recognised text of one region with its score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResult {
    /// Fragments joined with single spaces
    pub raw_text: String,
    pub mean_token_confidence: f32,
    /// `chars / 40`
    pub length_score: f32,
    pub composite_score: f32,
    /// Index of the region the text came from
    pub source_roi: usize,
}

/// Join the fragments of one region and score them
///
/// A region with no fragments scores 0.
pub fn score_lines(lines: &[OcrLine], source_roi: usize) -> OcrResult {
    if lines.is_empty() {
        return OcrResult {
            raw_text: String::new(),
            mean_token_confidence: 0.0,
            length_score: 0.0,
            composite_score: 0.0,
            source_roi,
        };
    }

    let raw_text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mean_token_confidence =
        lines.iter().map(|line| line.confidence).sum::<f32>() / lines.len() as f32;
    let length_score = raw_text.chars().count() as f32 / CHARS_PER_POINT;

    OcrResult {
        composite_score: length_score + mean_token_confidence,
        raw_text,
        mean_token_confidence,
        length_score,
        source_roi,
    }
}

/// Keep the highest scoring result; ties keep the first seen
pub fn select_best(results: impl IntoIterator<Item = OcrResult>) -> Option<OcrResult> {
    results.into_iter().fold(None, |best, candidate| match best {
        Some(current) if candidate.composite_score <= current.composite_score => Some(current),
        _ => Some(candidate),
    })
}
