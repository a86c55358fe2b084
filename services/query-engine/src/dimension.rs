//! Entity → category reference table
//!
//! Loaded once at startup and consulted per row during aggregation; rows are
//! never pre-joined with it. Entities without a mapping fall into the
//! `Unknown` category.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::info;
use types::dimension::{DimensionRecord, UNKNOWN_CATEGORY};
use types::ids::EntityId;

#[derive(Debug, Clone, Default)]
pub struct DimensionTable {
    categories: HashMap<EntityId, String>,
}

impl DimensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DimensionRecord>,
    {
        let categories = records
            .into_iter()
            .map(|r| (r.entity_id, r.category))
            .collect();
        Self { categories }
    }

    /// Load `[{"entity_id": ..., "category": ...}, ...]` from a JSON file.
    pub fn load_json(path: &Path) -> io::Result<Self> {
        let raw = fs::read(path)?;
        let records: Vec<DimensionRecord> = serde_json::from_slice(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let table = Self::from_records(records);
        info!(path = %path.display(), entities = table.len(), "Dimension table loaded");
        Ok(table)
    }

    /// Category of `entity`, or `Unknown`.
    pub fn category(&self, entity: &EntityId) -> &str {
        self.categories
            .get(entity)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_with_unknown_fallback() {
        let table = DimensionTable::from_records(vec![
            DimensionRecord::new("BW01", "Coal"),
            DimensionRecord::new("HPR1", "Battery"),
        ]);
        assert_eq!(table.category(&EntityId::new("HPR1")), "Battery");
        assert_eq!(table.category(&EntityId::new("NEW1")), "Unknown");
    }

    #[test]
    fn test_load_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dims.json");
        fs::write(
            &path,
            r#"[{"entity_id": "BW01", "category": "Coal"}, {"entity_id": "SOLAR1", "category": "Solar"}]"#,
        )
        .unwrap();
        let table = DimensionTable::load_json(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.category(&EntityId::new("SOLAR1")), "Solar");
    }

    #[test]
    fn test_malformed_json_is_invalid_data() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dims.json");
        fs::write(&path, "{not json").unwrap();
        let err = DimensionTable::load_json(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
