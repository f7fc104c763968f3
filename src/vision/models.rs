//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the detector, classifier
//! and PaddleOCR models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::VisionError;
use crate::config::ModelsConfig;

/// Environment variable that forbids model downloads
pub const OFFLINE_ENV: &str = "GUIDESCAN_OFFLINE";

/// Model files the services depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// PaddleOCR text detection model (DBNet)
    OcrDetection,
    /// PaddleOCR text recognition model (CRNN)
    OcrRecognition,
    /// Character dictionary for recognition
    OcrDictionary,
    /// YOLOv8 object detector
    ObjectDetector,
    /// ImageNet crop classifier
    Classifier,
    /// Label list for the crop classifier
    ClassifierLabels,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::OcrDetection,
        ModelType::OcrRecognition,
        ModelType::OcrDictionary,
        ModelType::ObjectDetector,
        ModelType::Classifier,
        ModelType::ClassifierLabels,
    ];

    /// Built-in download URL, if the model has a canonical source
    ///
    /// PaddleOCR models come from Hugging Face (monkt/paddleocr-onnx).
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            ModelType::OcrDetection => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx")
            }
            ModelType::OcrRecognition => Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx",
            ),
            ModelType::OcrDictionary => Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt",
            ),
            ModelType::ObjectDetector | ModelType::Classifier | ModelType::ClassifierLabels => None,
        }
    }

    /// Smallest plausible file size, used to reject truncated downloads
    pub fn min_size(&self) -> u64 {
        match self {
            ModelType::OcrDetection => 1_000_000,
            ModelType::OcrRecognition => 1_000_000,
            ModelType::OcrDictionary => 100,
            ModelType::ObjectDetector => 1_000_000,
            ModelType::Classifier => 1_000_000,
            ModelType::ClassifierLabels => 100,
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::OcrDetection => "Text Detection",
            ModelType::OcrRecognition => "Text Recognition",
            ModelType::OcrDictionary => "Character Dictionary",
            ModelType::ObjectDetector => "Object Detector",
            ModelType::Classifier => "Crop Classifier",
            ModelType::ClassifierLabels => "Classifier Labels",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Seconds since the Unix epoch
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Availability of one model file
#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub path: PathBuf,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    config: ModelsConfig,
}

impl ModelManager {
    /// Create a model manager, defaulting to `<data dir>/models`
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let models_dir = match &config.dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        Self::with_dir(models_dir, config)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, config: &ModelsConfig) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            config: config.clone(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// File name of a model inside the models directory
    pub fn filename(&self, model_type: ModelType) -> &str {
        match model_type {
            ModelType::OcrDetection => "det.onnx",
            ModelType::OcrRecognition => "rec.onnx",
            ModelType::OcrDictionary => "dict.txt",
            ModelType::ObjectDetector => &self.config.detector_file,
            ModelType::Classifier => &self.config.classifier_file,
            ModelType::ClassifierLabels => &self.config.classifier_labels_file,
        }
    }

    /// Where a missing model is fetched from
    pub fn download_url(&self, model_type: ModelType) -> Option<&str> {
        let configured = match model_type {
            ModelType::ObjectDetector => self.config.detector_url.as_deref(),
            ModelType::Classifier => self.config.classifier_url.as_deref(),
            ModelType::ClassifierLabels => self.config.classifier_labels_url.as_deref(),
            _ => None,
        };
        configured.or_else(|| model_type.default_url())
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(self.filename(model_type))
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() >= model_type.min_size())
            .unwrap_or(false)
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<ModelStatus> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ModelStatus {
                    model_type,
                    available: self.is_model_available(model_type),
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    fn is_offline(&self) -> bool {
        self.config.offline || std::env::var(OFFLINE_ENV).is_ok()
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        let Some(url) = self.download_url(model_type) else {
            anyhow::bail!(
                "{} model missing at {:?} and no download URL is configured",
                model_type.display_name(),
                path
            );
        };

        if self.is_offline() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);
        let sha256 = self.download_file(url, &path).await?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(model_type, sha256)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(path)
    }

    /// Ensure every model needed by the label scanner is present
    pub async fn ensure_scanner_models(&self) -> Result<()> {
        self.ensure_model(ModelType::OcrDetection).await?;
        self.ensure_model(ModelType::OcrRecognition).await?;
        self.ensure_model(ModelType::OcrDictionary).await?;
        self.ensure_model(ModelType::ObjectDetector).await?;
        Ok(())
    }

    /// Ensure every model needed by the label translator is present
    pub async fn ensure_translator_models(&self, with_classifier: bool) -> Result<()> {
        self.ensure_model(ModelType::ObjectDetector).await?;
        if with_classifier {
            // Classifier is optional
            if let Err(e) = self.ensure_model(ModelType::Classifier).await {
                warn!("Failed to fetch classifier model (optional): {}", e);
            }
            if let Err(e) = self.ensure_model(ModelType::ClassifierLabels).await {
                warn!("Failed to fetch classifier labels (optional): {}", e);
            }
        }
        Ok(())
    }

    /// Stream a file to disk, returning its SHA256
    async fn download_file(&self, url: &str, path: &Path) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);
        debug!("Downloaded {} bytes from {}", downloaded, url);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let path = self.model_path(model_type);
        let metadata = std::fs::metadata(&path)?;

        let downloaded_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: self.filename(model_type).to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at,
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// ONNX Runtime session wrapper
///
/// `Session::run` needs exclusive access, so the session sits behind a
/// mutex and the engines can be shared across request handlers.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            output_names,
        })
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Run a single-input model and copy out its first output
    ///
    /// Returns the output shape and the flattened f32 data.
    pub fn run(&self, input: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>), VisionError> {
        let shape: [usize; 4] = {
            let dims = input.shape();
            [dims[0], dims[1], dims[2], dims[3]]
        };
        let (data, _offset) = input.into_raw_vec_and_offset();
        let value = Value::from_array((shape, data))
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let (out_shape, out_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::OutputShape(e.to_string()))?;

        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ModelManager {
        ModelManager::with_dir(dir.path().to_path_buf(), &ModelsConfig::default()).unwrap()
    }

    #[test]
    fn test_model_filenames() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert_eq!(manager.filename(ModelType::OcrDetection), "det.onnx");
        assert_eq!(manager.filename(ModelType::OcrRecognition), "rec.onnx");
        assert_eq!(manager.filename(ModelType::ObjectDetector), "yolov8n.onnx");
        assert_eq!(
            manager.model_path(ModelType::Classifier),
            dir.path().join("mobilenet_v3_large.onnx")
        );
    }

    #[test]
    fn test_download_urls() {
        let dir = TempDir::new().unwrap();
        let mut config = ModelsConfig::default();
        config.detector_url = Some("http://mirror.local/yolo.onnx".to_string());
        let manager = ModelManager::with_dir(dir.path().to_path_buf(), &config).unwrap();

        assert!(manager
            .download_url(ModelType::OcrRecognition)
            .unwrap()
            .ends_with("english/rec.onnx"));
        assert_eq!(
            manager.download_url(ModelType::ObjectDetector),
            Some("http://mirror.local/yolo.onnx")
        );
        assert_eq!(manager.download_url(ModelType::Classifier), None);
    }

    #[test]
    fn test_truncated_file_is_not_available() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        std::fs::write(manager.model_path(ModelType::ObjectDetector), b"tiny").unwrap();
        assert!(!manager.is_model_available(ModelType::ObjectDetector));

        std::fs::write(manager.model_path(ModelType::OcrDictionary), "a\n".repeat(100)).unwrap();
        assert!(manager.is_model_available(ModelType::OcrDictionary));
    }

    #[test]
    fn test_model_status() {
        let dir = TempDir::new().unwrap();
        let status = manager(&dir).get_model_status();
        assert_eq!(status.len(), ModelType::ALL.len());
        assert!(status.iter().all(|s| !s.available && s.size_bytes.is_none()));
    }

    #[tokio::test]
    async fn test_ensure_model_without_url_fails() {
        let dir = TempDir::new().unwrap();
        let result = manager(&dir).ensure_model(ModelType::Classifier).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("no download URL"));
    }

    #[tokio::test]
    async fn test_ensure_model_offline_refuses_download() {
        let dir = TempDir::new().unwrap();
        let config = ModelsConfig {
            offline: true,
            ..ModelsConfig::default()
        };
        let manager = ModelManager::with_dir(dir.path().to_path_buf(), &config).unwrap();

        let message = manager
            .ensure_model(ModelType::OcrDetection)
            .await
            .unwrap_err()
            .to_string();
        assert!(message.contains("Offline mode"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(manager.load_manifest().unwrap().models.is_empty());

        std::fs::write(manager.model_path(ModelType::OcrDictionary), "x".repeat(200)).unwrap();
        manager
            .update_manifest_for_model(ModelType::OcrDictionary, "abc".to_string())
            .unwrap();
        manager
            .update_manifest_for_model(ModelType::OcrDictionary, "def".to_string())
            .unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(manifest.models[0].sha256, "def");
        assert_eq!(manifest.models[0].size_bytes, 200);
    }
}
