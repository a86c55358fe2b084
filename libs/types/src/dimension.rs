//! Dimension records: the small, mostly static `entity_id → category`
//! reference table consulted at query time.

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Category reported for entities that have no dimension mapping.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// One row of the dimension table (e.g. a unit and its fuel type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRecord {
    pub entity_id: EntityId,
    pub category: String,
}

impl DimensionRecord {
    pub fn new(entity_id: impl Into<EntityId>, category: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            category: category.into(),
        }
    }
}
