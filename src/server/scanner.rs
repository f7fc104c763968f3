//! Label scanner HTTP routes

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{health, request_span, run_blocking, ApiError};
use crate::pipeline::{AnalysisResult, LabelScanner};
use crate::vision::roi::decode_base64;

/// Multipart field holding the uploaded image
pub const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct ScannerState {
    pub scanner: Arc<LabelScanner>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBase64Request {
    pub image_base64: String,
    #[serde(default = "default_use_detector")]
    pub use_detector: bool,
}

fn default_use_detector() -> bool {
    true
}

/// Build the scanner router
pub fn router(scanner: Arc<LabelScanner>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/analyze-ocr-only", post(analyze_ocr_only))
        .route("/analyze-base64", post(analyze_base64))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(request_span))
        .with_state(ScannerState { scanner })
}

async fn analyze(
    State(state): State<ScannerState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let bytes = read_upload(multipart?).await?;
    scan(state, bytes, true).await
}

async fn analyze_ocr_only(
    State(state): State<ScannerState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let bytes = read_upload(multipart?).await?;
    scan(state, bytes, false).await
}

async fn analyze_base64(
    State(state): State<ScannerState>,
    payload: Result<Json<AnalyzeBase64Request>, JsonRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let Json(request) = payload?;
    let bytes = decode_base64(&request.image_base64)?;
    scan(state, bytes, request.use_detector).await
}

async fn scan(state: ScannerState, bytes: Vec<u8>, use_detector: bool) -> Result<Json<AnalysisResult>, ApiError> {
    debug!(bytes = bytes.len(), use_detector, "Scanning upload");
    let scanner = state.scanner.clone();
    let result = run_blocking(move || scanner.analyze_image(&bytes, use_detector)).await?;
    Ok(Json(result))
}

/// Read the bytes of the `file` field, ignoring any other fields
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            return Ok(field.bytes().await?.to_vec());
        }
    }
    Err(ApiError::BadRequest(format!(
        "missing multipart field `{}`",
        UPLOAD_FIELD
    )))
}
