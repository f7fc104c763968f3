//! Label analysis
//!
//! Text-level heuristics applied after OCR: region scoring, field
//! extraction and confidence aggregation.

pub mod confidence;
pub mod fields;
pub mod ocr_scoring;

pub use confidence::{aggregate, Signals};
pub use fields::{extract_fields, ExtractedFields};
pub use ocr_scoring::{score_lines, OcrResult};
