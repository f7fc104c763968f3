//! HTTP services
//!
//! Two axum routers share the error mapping, the request-id middleware and
//! the blocking-pool bridge defined here:
//! - [`scanner`]: product label scanning on `0.0.0.0:8000`
//! - [`translator`]: object label translation on `0.0.0.0:8001`

pub mod error;
pub mod scanner;
pub mod translator;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

pub use error::ApiError;

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Wrap every request in a span tagged with a fresh request id
pub async fn request_span(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Run a synchronous pipeline on the blocking pool inside the caller's span
pub async fn run_blocking<T, E, F>(job: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(job))
        .await?
        .map_err(Into::into)
}

/// Bind `addr` and serve `router` until ctrl-c
pub async fn serve(router: Router, addr: &str, name: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} on {}", name, addr))?;
    info!("{} listening on {}", name, listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .with_context(|| format!("{} server error", name))
}
