//! Medication safety notes
//!
//! `med_safety.json` maps an ingredient or brand key to a free-form note
//! (dosage, warnings). Notes are returned verbatim.

use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// Safety notes, looked up in file order
#[derive(Debug, Clone, Default)]
pub struct SafetyTable {
    notes: Vec<(String, Value)>,
}

impl SafetyTable {
    /// Load safety notes from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let table = Self::from_map(super::load_json_object(path)?);
        info!("Loaded {} safety notes from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            notes: map.into_iter().collect(),
        }
    }

    /// First note whose key occurs in `product_name`, ignoring case
    pub fn lookup(&self, product_name: &str) -> Option<&Value> {
        let haystack = product_name.to_lowercase();
        self.notes
            .iter()
            .find(|(key, _)| haystack.contains(&key.to_lowercase()))
            .map(|(_, note)| note)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> SafetyTable {
        let Value::Object(map) = json!({
            "Acetaminophen": {"max_daily_mg": 3000},
            "Tylenol": {"warning": "contains acetaminophen"},
            "Ibuprofen": {"warning": "take with food"}
        }) else {
            unreachable!()
        };
        SafetyTable::from_map(map)
    }

    #[test]
    fn test_lookup_by_substring() {
        let table = sample_table();
        let note = table.lookup("Tylenol Extra Strength").unwrap();
        assert_eq!(note["warning"], json!("contains acetaminophen"));
    }

    #[test]
    fn test_lookup_prefers_file_order() {
        let table = sample_table();
        let note = table.lookup("TYLENOL ACETAMINOPHEN 500").unwrap();
        assert_eq!(note["max_daily_mg"], json!(3000));
    }

    #[test]
    fn test_lookup_miss() {
        let table = sample_table();
        assert!(table.lookup("Campbell Soup").is_none());
        assert!(table.lookup("").is_none());
    }
}
