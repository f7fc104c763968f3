//! GuideScan - product label scanning and object label translation
//!
//! Two HTTP services over pretrained vision models: a label scanner that
//! reads product packaging, and a label translator that names the main
//! object in a photo in two languages.

mod analysis;
mod app;
mod config;
mod pipeline;
mod server;
mod storage;
mod translate;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::Services;
use crate::config::AppConfig;
use crate::vision::ModelType;

/// GuideScan vision services
#[derive(Parser, Debug)]
#[command(name = "guidescan", version)]
#[command(about = "Product label scanning and object label translation services")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the label scanner API
    Scanner {
        /// Bind address, overrides the config file
        #[arg(long)]
        addr: Option<String>,
    },
    /// Serve the label translator API
    Translator {
        /// Bind address, overrides the config file
        #[arg(long)]
        addr: Option<String>,
    },
    /// Scan a single image and print the result as JSON
    Analyze {
        image: PathBuf,
        /// Read the whole image without running the detector
        #[arg(long)]
        ocr_only: bool,
    },
    /// Show model status, downloading missing models
    Models {
        /// Only report, never download
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ort=warn")),
        )
        .init();

    let args = Args::parse();
    let config = load_or_default_config(args.config.as_deref())?;
    let services = Services::new(config)?;

    match args.command {
        Command::Scanner { addr } => {
            let addr = addr.unwrap_or_else(|| services.config().server.scanner_addr.clone());
            let router = services.scanner_router().await?;
            server::serve(router, &addr, "Label scanner").await?;
        }
        Command::Translator { addr } => {
            let addr = addr.unwrap_or_else(|| services.config().server.translator_addr.clone());
            let router = services.translator_router().await?;
            server::serve(router, &addr, "Label translator").await?;
        }
        Command::Analyze { image, ocr_only } => {
            let bytes = std::fs::read(&image).with_context(|| format!("Failed to read {:?}", image))?;
            let scanner = services.label_scanner().await?;
            let result = tokio::task::spawn_blocking(move || scanner.analyze_image(&bytes, !ocr_only)).await??;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Models { check } => {
            report_models(&services, check).await?;
        }
    }

    Ok(())
}

/// Load the explicit config file, or the default one if it exists
fn load_or_default_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            let config = config::load_config(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => default_config_file()
            .filter(|path| path.exists())
            .and_then(|path| match config::load_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    Some(config)
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable configuration {:?}: {:#}", path, e);
                    None
                }
            })
            .unwrap_or_else(|| {
                info!("Using default configuration");
                AppConfig::default()
            }),
    };

    config.apply_env_overrides();
    Ok(config)
}

fn default_config_file() -> Option<PathBuf> {
    storage::get_config_dir().ok().map(|dir| dir.join("config.toml"))
}

async fn report_models(services: &Services, check_only: bool) -> Result<()> {
    if !check_only {
        let models = services.models();
        models.ensure_scanner_models().await?;
        models
            .ensure_translator_models(services.config().classifier.enabled)
            .await?;
    }

    for status in services.models().get_model_status() {
        println!(
            "{:<22} {:<10} {}",
            status.model_type.display_name(),
            if status.available { "ready" } else { "missing" },
            status.path.display()
        );
    }

    let missing_required = [ModelType::OcrDetection, ModelType::OcrRecognition, ModelType::ObjectDetector]
        .into_iter()
        .filter(|&m| !services.models().is_model_available(m))
        .count();
    if missing_required > 0 {
        println!("{} required model(s) missing", missing_required);
    }
    Ok(())
}
