//! Application Configuration
//!
//! Service settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that forces the secondary classifier on or off
pub const USE_CLASSIFIER_ENV: &str = "USE_CLASSIFIER";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Model file locations
    pub models: ModelsConfig,
    /// Object detector settings
    pub detector: DetectorConfig,
    /// OCR engine settings
    pub ocr: OcrConfig,
    /// Secondary classifier settings
    pub classifier: ClassifierConfig,
    /// Translation backend settings
    pub translation: TranslationConfig,
    /// Static lookup data
    pub data: DataConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address of the label scanner service
    pub scanner_addr: String,
    /// Bind address of the label translator service
    pub translator_addr: String,
    /// Maximum accepted request body in megabytes
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scanner_addr: "0.0.0.0:8000".to_string(),
            translator_addr: "0.0.0.0:8001".to_string(),
            max_upload_mb: 10,
        }
    }
}

/// Model file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding model files (defaults to the platform data dir)
    pub dir: Option<PathBuf>,
    /// Refuse to download missing models
    pub offline: bool,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
    /// Object detector ONNX file name inside the models directory
    pub detector_file: String,
    /// Where to fetch the detector from when it is missing
    pub detector_url: Option<String>,
    /// Classifier ONNX file name inside the models directory
    pub classifier_file: String,
    /// Where to fetch the classifier from when it is missing
    pub classifier_url: Option<String>,
    /// Classifier label list (one label per line)
    pub classifier_labels_file: String,
    /// Where to fetch the classifier labels from when they are missing
    pub classifier_labels_url: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            offline: false,
            intra_threads: 4,
            detector_file: "yolov8n.onnx".to_string(),
            detector_url: None,
            classifier_file: "mobilenet_v3_large.onnx".to_string(),
            classifier_url: None,
            classifier_labels_file: "imagenet_classes.txt".to_string(),
            classifier_labels_url: None,
        }
    }
}

/// Object detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Square network input size
    pub input_size: u32,
    /// Minimum class confidence kept by the detector
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
    /// Upper bound on detections per image
    pub max_detections: usize,
    /// Minimum confidence for a detection to become an OCR region
    pub roi_confidence: f32,
    /// Padding in pixels added around detector boxes before OCR
    pub roi_padding: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
            roi_confidence: 0.3,
            roi_padding: 8,
        }
    }
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Probability threshold for the text detection map
    pub det_threshold: f32,
    /// Mean probability a text box needs to be kept
    pub box_threshold: f32,
    /// Expansion ratio applied to shrunk text boxes
    pub unclip_ratio: f32,
    /// Longest image side fed to the text detector
    pub det_max_side: u32,
    /// Height of recognition crops
    pub rec_height: u32,
    /// Maximum width of recognition crops
    pub rec_max_width: u32,
    /// Horizontal merge distance for paragraphs, in line heights
    pub paragraph_x_ratio: f32,
    /// Vertical merge distance for paragraphs, in line heights
    pub paragraph_y_ratio: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            det_max_side: 960,
            rec_height: 48,
            rec_max_width: 640,
            paragraph_x_ratio: 1.0,
            paragraph_y_ratio: 0.5,
        }
    }
}

/// Secondary classifier settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Load and run the crop classifier
    pub enabled: bool,
}

/// Translation backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Base URL of a LibreTranslate compatible service
    pub endpoint: String,
    /// Optional API key sent with every request
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

/// Static lookup files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Product catalog keyed by UPC
    pub catalog_path: PathBuf,
    /// Safety notes keyed by ingredient or brand
    pub safety_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("catalog.json"),
            safety_path: PathBuf::from("med_safety.json"),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides on top of file settings
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(USE_CLASSIFIER_ENV) {
            self.classifier.enabled = parse_flag(&value);
        }
    }
}

/// Interpret a feature flag value the way shell users write them
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
