//! Service registry
//!
//! Builds the heavy engines once at startup and hands them to the pipelines
//! as shared `Arc`s. Model files are fetched on first start.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::pipeline::{LabelScanner, ObjectLabeler, ScannerOptions};
use crate::storage::catalog::Catalog;
use crate::storage::safety::SafetyTable;
use crate::translate::{LibreTranslateClient, Translator};
use crate::vision::{
    ImageClassifier, ModelManager, ModelType, ObjectDetector, OnnxClassifier, PaddleOcrEngine,
    YoloDetector,
};

/// Engines and tables shared by the services
pub struct Services {
    config: AppConfig,
    models: ModelManager,
}

impl Services {
    pub fn new(config: AppConfig) -> Result<Self> {
        let models = ModelManager::new(&config.models)?;
        info!("Models directory: {:?}", models.models_dir());
        Ok(Self { config, models })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    fn max_upload_bytes(&self) -> usize {
        self.config.server.max_upload_mb.max(1) * 1024 * 1024
    }

    async fn object_detector(&self) -> Result<Arc<dyn ObjectDetector>> {
        let path = self.models.ensure_model(ModelType::ObjectDetector).await?;
        let detector = YoloDetector::new(&path, &self.config.detector, self.config.models.intra_threads)
            .context("Failed to load object detector")?;
        Ok(Arc::new(detector))
    }

    /// Load the crop classifier when enabled; failures disable it
    async fn classifier(&self) -> Option<Arc<dyn ImageClassifier>> {
        if !self.config.classifier.enabled {
            info!("Crop classifier disabled");
            return None;
        }

        let load = async {
            let model = self.models.ensure_model(ModelType::Classifier).await?;
            let labels = self.models.ensure_model(ModelType::ClassifierLabels).await?;
            OnnxClassifier::new(&model, &labels, self.config.models.intra_threads)
        };

        match load.await {
            Ok(classifier) => {
                info!("Crop classifier loaded");
                Some(Arc::new(classifier))
            }
            Err(e) => {
                warn!("Crop classifier unavailable: {:#}", e);
                None
            }
        }
    }

    /// Build the label scanner pipeline
    pub async fn label_scanner(&self) -> Result<Arc<LabelScanner>> {
        let detector = self.object_detector().await?;

        let det = self.models.ensure_model(ModelType::OcrDetection).await?;
        let rec = self.models.ensure_model(ModelType::OcrRecognition).await?;
        let dict = self.models.ensure_model(ModelType::OcrDictionary).await?;
        let ocr = PaddleOcrEngine::new(&det, &rec, &dict, &self.config.ocr, self.config.models.intra_threads)
            .context("Failed to load OCR engine")?;

        let catalog = load_or_empty("catalog", || Catalog::load(&self.config.data.catalog_path));
        let safety = load_or_empty("safety notes", || SafetyTable::load(&self.config.data.safety_path));

        let options = ScannerOptions {
            roi_confidence: self.config.detector.roi_confidence,
            roi_padding: self.config.detector.roi_padding,
        };

        Ok(Arc::new(LabelScanner::new(
            detector,
            Arc::new(ocr),
            Arc::new(catalog),
            Arc::new(safety),
            options,
        )))
    }

    /// Build the object labeler pipeline
    pub async fn object_labeler(&self) -> Result<Arc<ObjectLabeler>> {
        let detector = self.object_detector().await?;
        let classifier = self.classifier().await;
        Ok(Arc::new(ObjectLabeler::new(detector, classifier)))
    }

    /// Build the translation client
    pub fn translator(&self) -> Result<Arc<dyn Translator>> {
        let client = LibreTranslateClient::new(&self.config.translation)?;
        info!("Translation endpoint: {}", self.config.translation.endpoint);
        Ok(Arc::new(client))
    }

    /// Router for the scanner service
    pub async fn scanner_router(&self) -> Result<axum::Router> {
        let scanner = self.label_scanner().await?;
        Ok(crate::server::scanner::router(scanner, self.max_upload_bytes()))
    }

    /// Router for the translator service
    pub async fn translator_router(&self) -> Result<axum::Router> {
        let labeler = self.object_labeler().await?;
        let translator = self.translator()?;
        Ok(crate::server::translator::router(labeler, translator, self.max_upload_bytes()))
    }
}

/// Lookup tables are optional: a missing or broken file leaves them empty
fn load_or_empty<T: Default>(what: &str, load: impl FnOnce() -> Result<T>) -> T {
    match load() {
        Ok(table) => table,
        Err(e) => {
            warn!("No {} loaded: {:#}", what, e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn services(dir: &TempDir) -> Services {
        let mut config = AppConfig::default();
        config.models.dir = Some(dir.path().join("models"));
        config.models.offline = true;
        Services::new(config).unwrap()
    }

    #[test]
    fn test_services_create_models_dir() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        assert!(services.models().models_dir().is_dir());
        assert_eq!(services.max_upload_bytes(), 10 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_missing_detector_fails_startup() {
        let dir = TempDir::new().unwrap();
        let result = services(&dir).object_labeler().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_classifier_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(services(&dir).classifier().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_classifier_degrades_to_none() {
        let dir = TempDir::new().unwrap();
        let mut services = services(&dir);
        services.config.classifier.enabled = true;
        assert!(services.classifier().await.is_none());
    }

    #[test]
    fn test_load_or_empty() {
        let catalog = load_or_empty("catalog", || Catalog::load(std::path::Path::new("/nonexistent.json")));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_translator_builds() {
        let dir = TempDir::new().unwrap();
        assert!(services(&dir).translator().is_ok());
    }
}
