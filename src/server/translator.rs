//! Label translator HTTP routes

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{health, request_span, run_blocking, ApiError};
use crate::pipeline::ObjectLabeler;
use crate::translate::{translate_or_fallback, Translator};
use crate::vision::roi::decode_base64;

#[derive(Clone)]
pub struct TranslatorState {
    pub labeler: Arc<ObjectLabeler>,
    pub translator: Arc<dyn Translator>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessImageRequest {
    pub src_lang: String,
    pub dest_lang: String,
    /// Base64 encoded image
    pub image: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ProcessImageResponse {
    pub src_lang_description: Option<String>,
    pub dest_lang_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    pub image_base64: String,
    pub target_lang: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IdentifyResponse {
    pub word: Option<String>,
    pub translation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateTextRequest {
    pub text: String,
    pub target_language: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TranslateTextResponse {
    pub translated_text: String,
}

/// Build the translator router
pub fn router(labeler: Arc<ObjectLabeler>, translator: Arc<dyn Translator>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/process-image", post(process_image))
        .route("/identify", post(identify))
        .route("/translate", post(translate_text))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(request_span))
        .with_state(TranslatorState { labeler, translator })
}

/// Detect the main object and describe it in both languages
async fn process_image(
    State(state): State<TranslatorState>,
    payload: Result<Json<ProcessImageRequest>, JsonRejection>,
) -> Result<Json<ProcessImageResponse>, ApiError> {
    let Json(request) = payload?;
    let Some(label) = label_image(&state, &request.image).await? else {
        return Ok(Json(ProcessImageResponse {
            src_lang_description: None,
            dest_lang_description: None,
        }));
    };

    let (src, dest) = tokio::join!(
        translate_or_fallback(state.translator.as_ref(), &label, &request.src_lang),
        translate_or_fallback(state.translator.as_ref(), &label, &request.dest_lang),
    );

    Ok(Json(ProcessImageResponse {
        src_lang_description: Some(src.text().to_string()),
        dest_lang_description: Some(dest.text().to_string()),
    }))
}

/// Name the main object and optionally translate it
async fn identify(
    State(state): State<TranslatorState>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let Json(request) = payload?;
    let word = label_image(&state, &request.image_base64).await?;

    let translation = match (&word, &request.target_lang) {
        (Some(word), Some(target)) => {
            let outcome = translate_or_fallback(state.translator.as_ref(), word, target).await;
            Some(outcome.text().to_string())
        }
        _ => None,
    };

    Ok(Json(IdentifyResponse { word, translation }))
}

/// Plain text translation; a backend failure echoes the input
async fn translate_text(
    State(state): State<TranslatorState>,
    payload: Result<Json<TranslateTextRequest>, JsonRejection>,
) -> Result<Json<TranslateTextResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome =
        translate_or_fallback(state.translator.as_ref(), &request.text, &request.target_language).await;
    Ok(Json(TranslateTextResponse {
        translated_text: outcome.text().to_string(),
    }))
}

async fn label_image(state: &TranslatorState, image_base64: &str) -> Result<Option<String>, ApiError> {
    let bytes = decode_base64(image_base64)?;
    let labeler = state.labeler.clone();
    let outcome = run_blocking(move || labeler.identify(&bytes)).await?;
    Ok(outcome.label)
}
