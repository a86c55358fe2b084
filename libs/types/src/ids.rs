//! Identifier types for sources, entities and datasets
//!
//! A `SourceId` names one physical quantity published by the upstream market
//! operator (for example unit-level generation). It doubles as a directory
//! name in the store, so its alphabet is restricted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resolution::Resolution;

/// Identifier of an upstream data source.
///
/// Format: 1-64 characters from `[A-Za-z0-9_-]` (e.g. "unit_scada").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Create a new SourceId
    ///
    /// # Panics
    /// Panics if the identifier is empty, too long, or contains characters
    /// outside `[A-Za-z0-9_-]`
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(Self::is_valid(&s), "SourceId must match [A-Za-z0-9_-]{{1,64}}");
        Self(s)
    }

    /// Try to create a SourceId, returning None if invalid
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Get the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= 64
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_new(value.clone()).ok_or_else(|| format!("invalid source id: {:?}", value))
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a measured entity (a generating unit, an interconnector, ...).
///
/// Entity ids come straight from upstream rows and are never interpreted,
/// only compared and looked up in the dimension table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Key of one append-only dataset: a source at one sampling resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetKey {
    pub source: SourceId,
    pub resolution: Resolution,
}

impl DatasetKey {
    pub fn new(source: SourceId, resolution: Resolution) -> Self {
        Self { source, resolution }
    }

    pub fn fine(source: SourceId) -> Self {
        Self::new(source, Resolution::Fine)
    }

    pub fn coarse(source: SourceId) -> Self {
        Self::new(source, Resolution::Coarse)
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_creation() {
        let id = SourceId::new("unit_scada");
        assert_eq!(id.as_str(), "unit_scada");
    }

    #[test]
    fn test_source_id_try_new() {
        assert!(SourceId::try_new("dispatch-5min").is_some());
        assert!(SourceId::try_new("").is_none());
        assert!(SourceId::try_new("../etc").is_none());
        assert!(SourceId::try_new("a b").is_none());
        assert!(SourceId::try_new("x".repeat(65)).is_none());
    }

    #[test]
    #[should_panic(expected = "SourceId must match")]
    fn test_source_id_invalid_format() {
        SourceId::new("has/slash");
    }

    #[test]
    fn test_source_id_deserialization_validates() {
        let ok: SourceId = serde_json::from_str("\"unit_scada\"").unwrap();
        assert_eq!(ok, SourceId::new("unit_scada"));

        let bad = serde_json::from_str::<SourceId>("\"../../tmp\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_entity_id_serialization() {
        let id = EntityId::new("BAYSW1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"BAYSW1\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_dataset_key_display() {
        let key = DatasetKey::fine(SourceId::new("unit_scada"));
        assert_eq!(key.to_string(), "unit_scada/fine");
        assert_eq!(DatasetKey::coarse(SourceId::new("x")).to_string(), "x/coarse");
    }
}
