//! Storage Layer
//!
//! Locates application directories and loads the static JSON lookup files
//! (product catalog and safety notes) once at startup.

pub mod catalog;
pub mod safety;

pub use catalog::{Catalog, CatalogEntry};
pub use safety::SafetyTable;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "guidescan", "GuideScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "guidescan", "GuideScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Read a JSON object file, keeping keys in file order
pub fn load_json_object(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!(
            "Expected a JSON object in {:?}, found {}",
            path,
            json_kind(&other)
        ),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
