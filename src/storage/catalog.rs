//! Product catalog lookup
//!
//! The catalog is a JSON object keyed by product id (UPC). Each value holds
//! at least a `name`; every other field is carried through untouched.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// Number of leading characters of an extracted name compared against catalog names
pub const NAME_PREFIX_CHARS: usize = 8;

/// A single catalog product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Product id the entry is keyed by
    #[serde(rename = "upc")]
    pub id: String,
    /// Product display name
    pub name: String,
    /// Remaining product fields
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Read-only product catalog, iterated in file order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from entries in lookup order
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load the catalog from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let map = super::load_json_object(path)?;
        let catalog = Self::from_map(map)?;
        info!("Loaded {} catalog entries from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Build a catalog from an already parsed JSON object
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());

        for (id, value) in map {
            let Value::Object(mut metadata) = value else {
                anyhow::bail!("Catalog entry {id} is not an object");
            };
            let name = metadata
                .remove("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .with_context(|| format!("Catalog entry {id} has no string `name`"))?;

            entries.push(CatalogEntry { id, name, metadata });
        }

        Ok(Self { entries })
    }

    /// Find the first entry whose name starts with the extracted name's prefix
    ///
    /// Only the first [`NAME_PREFIX_CHARS`] characters of the extracted name
    /// take part, compared case-insensitively. The first hit in file order
    /// wins; later candidates are not ranked.
    pub fn match_name(&self, name: Option<&str>) -> Option<&CatalogEntry> {
        let name = name?;
        if name.is_empty() {
            return None;
        }

        let prefix: String = name.to_lowercase().chars().take(NAME_PREFIX_CHARS).collect();
        self.entries
            .iter()
            .find(|entry| entry.name.to_lowercase().starts_with(&prefix))
    }

    /// Entries in lookup order
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
