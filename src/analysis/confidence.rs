//! Confidence aggregation
//!
//! The scanner reports one score built from which signals were found,
//! not from model probabilities.

use serde::Serialize;

use super::fields::ExtractedFields;

/// Best OCR text longer than this many characters counts as a signal
pub const TEXT_LENGTH_THRESHOLD: usize = 10;

pub const TEXT_WEIGHT: f32 = 0.35;
pub const NAME_WEIGHT: f32 = 0.25;
pub const VARIANT_WEIGHT: f32 = 0.20;
pub const EXPIRY_WEIGHT: f32 = 0.10;
pub const CATALOG_WEIGHT: f32 = 0.10;

/// Which signals a scan produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Signals {
    pub long_text: bool,
    pub name: bool,
    pub variant: bool,
    pub expiry: bool,
    pub catalog_match: bool,
}

impl Signals {
    /// Collect signals from the scan artefacts
    pub fn from_scan(best_text: &str, fields: &ExtractedFields, catalog_match: bool) -> Self {
        Self {
            long_text: best_text.chars().count() > TEXT_LENGTH_THRESHOLD,
            name: fields.name.is_some(),
            variant: fields.variant.is_some(),
            expiry: fields.expiry_text.is_some(),
            catalog_match,
        }
    }
}

/// Weighted sum of present signals, clamped to [0, 1]
pub fn aggregate(signals: &Signals) -> f32 {
    let weighted = [
        (signals.long_text, TEXT_WEIGHT),
        (signals.name, NAME_WEIGHT),
        (signals.variant, VARIANT_WEIGHT),
        (signals.expiry, EXPIRY_WEIGHT),
        (signals.catalog_match, CATALOG_WEIGHT),
    ];
    let sum: f32 = weighted
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum();
    sum.clamp(0.0, 1.0)
}

/// Round to `decimals` places for reporting
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
