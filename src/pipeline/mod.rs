//! Request pipelines
//!
//! Each pipeline runs synchronously over engines injected at startup; the
//! HTTP layer moves them onto the blocking pool.

pub mod labeler;
pub mod scanner;

pub use labeler::{LabelOutcome, ObjectLabeler};
pub use scanner::{AnalysisResult, LabelScanner, ScannerOptions};
